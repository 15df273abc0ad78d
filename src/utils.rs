pub fn hexdump(buffer: &[u8], start: u16, end: u16) -> String {
    // `end` is exclusive and clamped to the buffer
    let end = end.min(buffer.len() as u16);
    let mut str = String::new();
    let mut addr = start;
    while addr < end {
        let mut line = format!("{:04x}: ", addr);
        let mut chars = String::new();
        for _ in 0..16 {
            if addr < end {
                let byte = buffer[addr as usize];
                line.push_str(&format!("{:02x} ", byte));
                let c = byte as char;
                chars.push(if c.is_ascii_graphic() || c == ' ' {
                    c
                } else {
                    '.'
                });

                addr = addr.wrapping_add(1);
            }
        }

        let dump_line = format!("{:>54} {}\n", line, chars);
        str.push_str(&dump_line);

        if addr == 0 {
            break;
        }
    }

    str
}

pub fn partial_hexdump(buffer: &[u8], start: u16, end: u16) -> String {
    hexdump(buffer, start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hexdump_line_format() {
        let data = vec![0x41; 0x20];
        let dump = hexdump(&data, 0, 0x10);
        assert!(dump.trim_start().starts_with("0000: 41 41"));
        assert!(dump.trim_end().ends_with("AAAAAAAAAAAAAAAA"));
    }

    #[test]
    fn test_hexdump_full_buffer_stays_in_bounds() {
        let data = vec![0x42; 0x18];
        let dump = hexdump(&data, 0, data.len() as u16);
        assert_eq!(dump.lines().count(), 2);
        assert!(dump.contains("0010: 42"));

        // past-the-end ranges clamp instead of panicking
        let dump = hexdump(&data, 0x10, 0xFFFF);
        assert_eq!(dump.lines().count(), 1);
    }
}
