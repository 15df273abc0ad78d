//! The pull boundary between the machine and the platform audio thread.
//!
//! Everything audible (audio RAM, channel state, the sequencer) lives in
//! one [`AudioState`] behind a mutex. The bus locks it briefly for
//! register accesses and note triggers; the audio callback locks it in
//! [`AudioHandle::fill`] to render samples. The sequencer is clocked
//! from inside `fill`, one tick per tempo-scaled block of samples, so
//! song timing follows the sample clock rather than the frame clock.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    apu::{Apu, AudioRam, CHANNELS},
    sequencer::{SeqEvent, Sequencer},
};

/// Sequencer ticks default to one per 1024 samples at 44.1 kHz.
pub const SAMPLES_PER_TICK: u32 = 1024;

const TEMPO_MIN: f32 = 0.25;
const TEMPO_MAX: f32 = 4.0;

pub type SharedAudio = Arc<Mutex<AudioState>>;

pub struct AudioState {
    pub ram: AudioRam,
    pub apu: Apu,
    pub sequencer: Sequencer,
    tempo: f32,
    tick_countdown: u32,
}

impl Default for AudioState {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioState {
    pub fn new() -> Self {
        Self {
            ram: AudioRam::default(),
            apu: Apu::new(),
            sequencer: Sequencer::new(),
            tempo: 1.0,
            tick_countdown: SAMPLES_PER_TICK,
        }
    }

    pub fn reset(&mut self) {
        self.apu.reset(&mut self.ram);
        self.sequencer.disable();
        self.tempo = 1.0;
        self.tick_countdown = SAMPLES_PER_TICK;
    }

    /// Tempo multiplier: >1 slows the song down (more samples per tick).
    pub fn set_tempo(&mut self, tempo: f32) {
        self.tempo = tempo.clamp(TEMPO_MIN, TEMPO_MAX);
    }

    fn samples_per_tick(&self) -> u32 {
        ((SAMPLES_PER_TICK as f32 * self.tempo) as u32).max(1)
    }

    pub fn play_note(&mut self, ch: usize, note: u8, instrument: u8, prioritized: bool) -> bool {
        self.apu
            .play_note(&mut self.ram, ch, note, instrument, prioritized)
    }

    pub fn stop_note(&mut self, ch: usize) {
        self.apu.stop_note(&mut self.ram, ch);
    }

    /// Hard mute: kills envelopes and the song immediately.
    pub fn mute(&mut self) {
        self.sequencer.disable();
        self.apu.stop_all_hard(&mut self.ram);
    }

    pub fn start_song(&mut self, addr: u16, snapshot: Vec<u8>) {
        self.sequencer.start(addr, snapshot);
    }

    fn apply(&mut self, event: SeqEvent) {
        match event {
            SeqEvent::Play {
                channel,
                note,
                instrument,
            } => {
                // song notes claim their channel against direct PLAYs
                self.play_note(channel as usize % CHANNELS, note, instrument, true);
            }
            SeqEvent::Stop { channel } => self.stop_note(channel as usize % CHANNELS),
            SeqEvent::StopAll => self.apu.release_all(&mut self.ram),
        }
    }

    fn render(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            self.tick_countdown -= 1;
            if self.tick_countdown == 0 {
                self.tick_countdown = self.samples_per_tick();
                let events = self.sequencer.tick();
                for event in events {
                    self.apply(event);
                }
            }
            *sample = self.apu.next_sample(&self.ram);
        }
    }
}

/// Cloneable handle given to the platform audio callback.
#[derive(Clone)]
pub struct AudioHandle {
    inner: SharedAudio,
}

impl AudioHandle {
    pub fn new(inner: SharedAudio) -> Self {
        Self { inner }
    }

    /// Fills `out` with mono f32 samples at 44.1 kHz.
    pub fn fill(&self, out: &mut [f32]) {
        self.inner.lock().render(out);
    }

    pub fn set_tempo(&self, tempo: f32) {
        self.inner.lock().set_tempo(tempo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apu::{note_to_hz, CONTROL_GATE};

    #[test]
    fn test_song_note_lands_in_audio_ram() {
        let mut state = AudioState::new();
        let mut ram = vec![0u8; 0x10000];
        // one record then end
        ram[0xC000..0xC008].copy_from_slice(&[0, 69, 1, 0, 0xFF, 0, 0, 0]);
        state.start_song(0xC000, ram);

        let mut out = vec![0.0f32; SAMPLES_PER_TICK as usize + 8];
        state.render(&mut out);

        assert_eq!(state.ram.channel_freq(0), note_to_hz(69).round() as u16);
        assert_ne!(state.ram.channel_control(0) & CONTROL_GATE, 0);
    }

    #[test]
    fn test_mute_silences_and_stops_song() {
        let mut state = AudioState::new();
        state.play_note(0, 60, 0, false);
        state.start_song(0, vec![0xFF; 16]);
        state.mute();

        assert!(!state.sequencer.enabled());
        assert_eq!(state.ram.channel_control(0), 0);
        let mut out = vec![0.0f32; 64];
        state.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
