//! Song sequencer. Songs are streams of 4-byte records
//! `[channel, note, duration, instrument]` read from a RAM snapshot
//! taken when playback starts, so the audio thread never races the CPU
//! over live memory.
//!
//! Two control codes live in the channel byte: 0xFF ends the song and
//! stops every channel, 0xFE jumps to the little-endian address in the
//! duration/instrument bytes. A note of 0 releases the channel instead
//! of playing.

pub const SEQ_END: u8 = 0xFF;
pub const SEQ_JUMP: u8 = 0xFE;
pub const RECORD_SIZE: u16 = 4;

/// Guard against zero-duration loops chewing a whole tick.
const MAX_RECORDS_PER_TICK: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqEvent {
    Play {
        channel: u8,
        note: u8,
        instrument: u8,
    },
    Stop {
        channel: u8,
    },
    StopAll,
}

#[derive(Debug, Default)]
pub struct Sequencer {
    song: Vec<u8>,
    cursor: u16,
    delay: u16,
    enabled: bool,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn cursor(&self) -> u16 {
        self.cursor
    }

    /// Starts playback at `addr` inside `snapshot`, a copy of system
    /// RAM taken at the moment the song was triggered.
    pub fn start(&mut self, addr: u16, snapshot: Vec<u8>) {
        tracing::debug!("[SEQ] Song start at {:#06X}", addr);
        self.song = snapshot;
        self.cursor = addr;
        self.delay = 0;
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.song = Vec::new();
    }

    fn byte(&self, addr: u16) -> u8 {
        if self.song.is_empty() {
            return SEQ_END;
        }
        self.song[addr as usize % self.song.len()]
    }

    /// Advances one tick and returns the channel events it produced.
    /// Records with a non-zero duration arm the delay counter; zero
    /// durations chain into the same tick.
    pub fn tick(&mut self) -> Vec<SeqEvent> {
        let mut events = Vec::new();
        if !self.enabled {
            return events;
        }
        if self.delay > 0 {
            self.delay -= 1;
            // the tick that exhausts the counter processes records too,
            // so a duration of N occupies exactly N ticks
            if self.delay > 0 {
                return events;
            }
        }

        for _ in 0..MAX_RECORDS_PER_TICK {
            let channel = self.byte(self.cursor);
            match channel {
                SEQ_END => {
                    tracing::debug!("[SEQ] Song end at {:#06X}", self.cursor);
                    events.push(SeqEvent::StopAll);
                    self.disable();
                    break;
                }
                SEQ_JUMP => {
                    let target = u16::from_le_bytes([
                        self.byte(self.cursor.wrapping_add(2)),
                        self.byte(self.cursor.wrapping_add(3)),
                    ]);
                    tracing::trace!("[SEQ] Jump {:#06X} -> {:#06X}", self.cursor, target);
                    self.cursor = target;
                }
                _ => {
                    let note = self.byte(self.cursor.wrapping_add(1));
                    let duration = self.byte(self.cursor.wrapping_add(2));
                    let instrument = self.byte(self.cursor.wrapping_add(3));
                    self.cursor = self.cursor.wrapping_add(RECORD_SIZE);

                    if note == 0 {
                        events.push(SeqEvent::Stop { channel });
                    } else {
                        events.push(SeqEvent::Play {
                            channel,
                            note,
                            instrument,
                        });
                    }
                    if duration > 0 {
                        self.delay = duration as u16;
                        break;
                    }
                }
            }
        }
        events
    }
}
