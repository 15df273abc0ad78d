//! Audio unit: 8 channels (6 tonal + 2 noise) with per-channel ADSR
//! envelopes, driven one sample at a time by the audio-pull boundary in
//! `sound.rs`. Channel and instrument registers live in audio RAM so
//! cartridge code can observe them.

use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

pub const CHANNELS: usize = 8;
/// First noise channel; 6 and 7 are noise, 0-5 are tonal.
pub const FIRST_NOISE_CHANNEL: usize = 6;
pub const CHANNEL_STRIDE: usize = 4;
pub const INSTRUMENTS: usize = 64;
pub const INSTRUMENT_TABLE_OFFSET: usize = CHANNELS * CHANNEL_STRIDE;
pub const AUDIO_RAM_BYTES: usize = INSTRUMENT_TABLE_OFFSET + INSTRUMENTS * 4;

pub const CONTROL_GATE: u8 = 0x01;
pub const CONTROL_PRIORITY: u8 = 0x02;

pub const SAMPLE_RATE: f32 = 44_100.0;

const CHANNEL_GAIN: f32 = 0.25;
const PRE_GAIN: f32 = 0.8;

/// MIDI-style note number to frequency, A4 (69) = 440 Hz.
pub fn note_to_hz(note: u8) -> f32 {
    440.0 * 2f32.powf((note as f32 - 69.0) / 12.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adsr {
    pub attack: u8,
    pub decay: u8,
    pub sustain: u8,
    pub release: u8,
}

/// Instrument presets installed at reset. Index 0 is a plain organ-ish
/// envelope; the tail presets are percussion-friendly.
const DEFAULT_INSTRUMENTS: [Adsr; 8] = [
    Adsr { attack: 4, decay: 24, sustain: 200, release: 40 },
    Adsr { attack: 0, decay: 16, sustain: 160, release: 24 },
    Adsr { attack: 32, decay: 48, sustain: 180, release: 96 },
    Adsr { attack: 0, decay: 64, sustain: 0, release: 16 },
    Adsr { attack: 2, decay: 8, sustain: 220, release: 64 },
    Adsr { attack: 64, decay: 32, sustain: 128, release: 128 },
    Adsr { attack: 0, decay: 24, sustain: 0, release: 8 },
    Adsr { attack: 0, decay: 96, sustain: 64, release: 48 },
];

/// The memory-mapped audio region: 8 channel records of
/// [freq_lo, freq_hi, control, instrument] followed by the instrument
/// table (attack, decay, sustain, release quadruplets).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioRam {
    #[serde(with = "BigArray")]
    data: [u8; AUDIO_RAM_BYTES],
}

impl Default for AudioRam {
    fn default() -> Self {
        let mut ram = Self {
            data: [0; AUDIO_RAM_BYTES],
        };
        ram.load_default_instruments();
        ram
    }
}

impl AudioRam {
    pub fn read(&self, offset: usize) -> u8 {
        self.data.get(offset).copied().unwrap_or(0)
    }

    pub fn write(&mut self, offset: usize, value: u8) {
        if let Some(slot) = self.data.get_mut(offset) {
            *slot = value;
        }
    }

    pub fn channel_freq(&self, ch: usize) -> u16 {
        let base = ch * CHANNEL_STRIDE;
        u16::from_le_bytes([self.data[base], self.data[base + 1]])
    }

    pub fn channel_control(&self, ch: usize) -> u8 {
        self.data[ch * CHANNEL_STRIDE + 2]
    }

    pub fn channel_instrument(&self, ch: usize) -> u8 {
        self.data[ch * CHANNEL_STRIDE + 3]
    }

    pub fn set_channel(&mut self, ch: usize, freq: u16, control: u8, instrument: u8) {
        let base = ch * CHANNEL_STRIDE;
        self.data[base..base + 2].copy_from_slice(&freq.to_le_bytes());
        self.data[base + 2] = control;
        self.data[base + 3] = instrument;
    }

    pub fn set_control(&mut self, ch: usize, control: u8) {
        self.data[ch * CHANNEL_STRIDE + 2] = control;
    }

    pub fn instrument(&self, index: u8) -> Adsr {
        let base = INSTRUMENT_TABLE_OFFSET + (index as usize % INSTRUMENTS) * 4;
        Adsr {
            attack: self.data[base],
            decay: self.data[base + 1],
            sustain: self.data[base + 2],
            release: self.data[base + 3],
        }
    }

    pub fn set_instrument(&mut self, index: u8, adsr: Adsr) {
        let base = INSTRUMENT_TABLE_OFFSET + (index as usize % INSTRUMENTS) * 4;
        self.data[base] = adsr.attack;
        self.data[base + 1] = adsr.decay;
        self.data[base + 2] = adsr.sustain;
        self.data[base + 3] = adsr.release;
    }

    pub fn load_default_instruments(&mut self) {
        for (i, adsr) in DEFAULT_INSTRUMENTS.iter().enumerate() {
            self.set_instrument(i as u8, *adsr);
        }
    }

    pub fn reset(&mut self) {
        self.data.fill(0);
        self.load_default_instruments();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

#[derive(Debug, Clone, Default)]
pub struct Channel {
    phase: f32,
    volume: f32,
    stage: Stage,
    last_freq: u16,
    last_control: u8,
    last_instrument: u8,
    noise_timer: u32,
    noise_value: f32,
    pub prioritized: bool,
}

impl Channel {
    /// Envelope step sizes are tiny per-sample increments derived from
    /// the instrument bytes; larger bytes mean slower ramps.
    fn attack_step(adsr: &Adsr) -> f32 {
        1.0 / ((adsr.attack as f32 + 1.0) * 64.0)
    }

    fn decay_step(adsr: &Adsr) -> f32 {
        1.0 / ((adsr.decay as f32 + 1.0) * 128.0)
    }

    fn release_step(adsr: &Adsr) -> f32 {
        1.0 / ((adsr.release as f32 + 1.0) * 128.0)
    }

    fn sustain_level(adsr: &Adsr) -> f32 {
        adsr.sustain as f32 / 255.0
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn trigger(&mut self) {
        // Attack continues from the current volume so a retrigger never
        // produces a sample-level step.
        self.stage = Stage::Attack;
    }

    pub fn kill(&mut self) {
        self.stage = Stage::Idle;
        self.volume = 0.0;
        self.phase = 0.0;
        self.prioritized = false;
    }

    fn step_envelope(&mut self, gated: bool, adsr: &Adsr) {
        if !gated && !matches!(self.stage, Stage::Idle | Stage::Release) {
            self.stage = Stage::Release;
        }

        match self.stage {
            Stage::Idle => self.volume = 0.0,
            Stage::Attack => {
                self.volume += Self::attack_step(adsr);
                if self.volume >= 1.0 {
                    self.volume = 1.0;
                    self.stage = Stage::Decay;
                }
            }
            Stage::Decay => {
                let sustain = Self::sustain_level(adsr);
                self.volume -= Self::decay_step(adsr);
                if self.volume <= sustain {
                    self.volume = sustain;
                    self.stage = Stage::Sustain;
                }
            }
            Stage::Sustain => {
                self.volume = Self::sustain_level(adsr);
                if self.volume <= 0.0 {
                    self.stage = Stage::Idle;
                }
            }
            Stage::Release => {
                self.volume -= Self::release_step(adsr);
                if self.volume <= 0.0 {
                    self.volume = 0.0;
                    self.stage = Stage::Idle;
                }
            }
        }
    }

    fn next(&mut self, index: usize, ram: &AudioRam, rng: &mut SmallRng) -> f32 {
        let freq = ram.channel_freq(index);
        let control = ram.channel_control(index);
        let instrument = ram.channel_instrument(index);
        let adsr = ram.instrument(instrument);

        let gated = control & CONTROL_GATE != 0;
        let was_gated = self.last_control & CONTROL_GATE != 0;
        let data_changed = freq != self.last_freq || instrument != self.last_instrument;
        if gated && (!was_gated || data_changed) {
            self.trigger();
        }
        self.last_freq = freq;
        self.last_control = control;
        self.last_instrument = instrument;

        self.step_envelope(gated, &adsr);
        if matches!(self.stage, Stage::Idle) {
            return 0.0;
        }

        let wave = if index >= FIRST_NOISE_CHANNEL {
            self.next_noise(freq, rng)
        } else {
            self.next_tone(index, freq)
        };
        wave * self.volume
    }

    fn next_tone(&mut self, index: usize, freq: u16) -> f32 {
        if freq == 0 {
            return 0.0;
        }
        let dt = freq as f32 / SAMPLE_RATE;
        self.phase += dt;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        let t = self.phase;

        match index / 2 {
            0 => {
                // band-limited square
                let mut s = if t < 0.5 { 1.0 } else { -1.0 };
                s += poly_blep(t, dt);
                s -= poly_blep((t + 0.5) % 1.0, dt);
                s
            }
            1 => 1.0 - 4.0 * (t - 0.5).abs(),
            _ => {
                // band-limited sawtooth
                2.0 * t - 1.0 - poly_blep(t, dt)
            }
        }
    }

    /// The noise gate period is inversely proportional to the frequency
    /// field: larger values draw new random samples faster.
    fn next_noise(&mut self, freq: u16, rng: &mut SmallRng) -> f32 {
        let period = (SAMPLE_RATE / (freq as f32 + 1.0)).max(1.0) as u32;
        if self.noise_timer == 0 {
            self.noise_value = rng.gen_range(-1.0..=1.0);
            self.noise_timer = period;
        }
        self.noise_timer -= 1;
        self.noise_value
    }
}

/// Standard polynomial step correction applied around phase
/// discontinuities of square and saw oscillators.
fn poly_blep(t: f32, dt: f32) -> f32 {
    if t < dt {
        let t = t / dt;
        t + t - t * t - 1.0
    } else if t > 1.0 - dt {
        let t = (t - 1.0) / dt;
        t * t + t + t + 1.0
    } else {
        0.0
    }
}

pub struct Apu {
    pub channels: [Channel; CHANNELS],
    rng: SmallRng,
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}

impl Apu {
    pub fn new() -> Self {
        Self {
            channels: Default::default(),
            rng: SmallRng::seed_from_u64(0x5348_5250),
        }
    }

    pub fn reset(&mut self, ram: &mut AudioRam) {
        for channel in &mut self.channels {
            *channel = Channel::default();
        }
        ram.reset();
    }

    /// One mixed output sample: sum the channels and soft-clip.
    pub fn next_sample(&mut self, ram: &AudioRam) -> f32 {
        let mut sum = 0.0;
        for (i, channel) in self.channels.iter_mut().enumerate() {
            sum += channel.next(i, ram, &mut self.rng) * CHANNEL_GAIN;
        }
        (sum * PRE_GAIN).tanh()
    }

    /// Programs a note into audio RAM and retriggers the envelope.
    /// Returns false when the channel holds a prioritized note and the
    /// caller did not override.
    pub fn play_note(
        &mut self,
        ram: &mut AudioRam,
        ch: usize,
        note: u8,
        instrument: u8,
        prioritized: bool,
    ) -> bool {
        let ch = ch % CHANNELS;
        let channel = &mut self.channels[ch];
        if channel.prioritized && !prioritized {
            tracing::trace!("[APU] Channel {} prioritized, note {} ignored", ch, note);
            return false;
        }
        channel.prioritized = prioritized;

        let freq = note_to_hz(note).round() as u16;
        let mut control = CONTROL_GATE;
        if prioritized {
            control |= CONTROL_PRIORITY;
        }
        ram.set_channel(ch, freq, control, instrument);
        channel.trigger();
        true
    }

    /// Drops the gate; the envelope releases on its own.
    pub fn stop_note(&mut self, ram: &mut AudioRam, ch: usize) {
        let ch = ch % CHANNELS;
        let control = ram.channel_control(ch) & !(CONTROL_GATE | CONTROL_PRIORITY);
        ram.set_control(ch, control);
        self.channels[ch].prioritized = false;
    }

    /// Gate-off on every channel; envelopes fade through Release.
    pub fn release_all(&mut self, ram: &mut AudioRam) {
        for ch in 0..CHANNELS {
            self.stop_note(ram, ch);
        }
    }

    /// Immediate silence, used by the ALT MUTE opcode and fault resets.
    pub fn stop_all_hard(&mut self, ram: &mut AudioRam) {
        for ch in 0..CHANNELS {
            ram.set_control(ch, 0);
            self.channels[ch].kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_to_hz_a4() {
        assert!((note_to_hz(69) - 440.0).abs() < 0.5);
        assert!((note_to_hz(81) - 880.0).abs() < 1.0);
    }

    #[test]
    fn test_envelope_reaches_sustain_then_releases() {
        let mut apu = Apu::new();
        let mut ram = AudioRam::default();
        apu.play_note(&mut ram, 0, 69, 0, false);

        for _ in 0..200_000 {
            apu.next_sample(&ram);
        }
        assert_eq!(apu.channels[0].stage(), Stage::Sustain);
        let sustain = apu.channels[0].volume();
        assert!(sustain > 0.0 && sustain < 1.0);

        apu.stop_note(&mut ram, 0);
        for _ in 0..2_000_000 {
            apu.next_sample(&ram);
        }
        assert_eq!(apu.channels[0].stage(), Stage::Idle);
        assert_eq!(apu.channels[0].volume(), 0.0);
    }

    #[test]
    fn test_priority_blocks_unprioritized_notes() {
        let mut apu = Apu::new();
        let mut ram = AudioRam::default();

        assert!(apu.play_note(&mut ram, 3, 60, 0, true));
        assert!(!apu.play_note(&mut ram, 3, 72, 0, false));
        assert_eq!(ram.channel_freq(3), note_to_hz(60).round() as u16);

        // explicit override wins
        assert!(apu.play_note(&mut ram, 3, 72, 0, true));
        assert_eq!(ram.channel_freq(3), note_to_hz(72).round() as u16);
    }
}
