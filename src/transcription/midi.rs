//! Standard MIDI File encoding of decoded notes.
//!
//! Output is a format-1 file with two tracks: a conductor track carrying
//! tempo and a 4/4 time signature, and one instrument track on channel 0.

use midly::num::{u14, u15, u24, u28, u4, u7};
use midly::{
    Format, Header, MetaMessage, MidiMessage, PitchBend, Smf, Timing, TrackEvent, TrackEventKind,
};

use crate::engine::constants::{
    ANNOT_N_FRAMES, AUDIO_N_SAMPLES, CONTOURS_BINS_PER_SEMITONE, FFT_HOP, MODEL_SAMPLE_RATE,
};
use crate::error::{Result, TranscribeError};
use crate::types::TranscriptionConfig;

use super::notes::NoteEvent;

/// Ticks per quarter note.
pub const TICKS_PER_QUARTER: u16 = 220;

/// General MIDI program selected on the instrument track (electric piano).
const PROGRAM: u8 = 4;

const PITCH_BEND_CENTER: i32 = 8192;
const PITCH_BEND_MAX: i32 = 16383;

/// Bend units per contour bin (a third of a semitone, two-semitone range).
const BEND_PER_BIN: i32 = 4096 / CONTOURS_BINS_PER_SEMITONE as i32;

/// Maps model frame indices to seconds, correcting for window overlap.
pub fn model_frames_to_time(n_frames: usize) -> Vec<f32> {
    let time_factor = FFT_HOP as f32 / MODEL_SAMPLE_RATE as f32;
    let window_factor = 1.0 / ANNOT_N_FRAMES as f32;
    let window_offset = time_factor
        * (ANNOT_N_FRAMES as f32 - AUDIO_N_SAMPLES as f32 / FFT_HOP as f32)
        + 0.0018;

    (0..n_frames)
        .map(|i| {
            let i = i as f32;
            i * time_factor - window_offset * (i * window_factor)
        })
        .collect()
}

/// Converts seconds to ticks at the given tempo.
pub fn time_to_ticks(seconds: f32, tempo_us: u32) -> u32 {
    let ticks = (seconds as f64 * TICKS_PER_QUARTER as f64 * 1_000_000.0) / tempo_us as f64;
    ticks.round().max(0.0) as u32
}

/// Ordering of events that share a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EventRank {
    NoteOff,
    NoteOn,
    Bend,
}

/// Encodes notes to SMF bytes.
///
/// `n_frames` is the length of the posteriorgram the notes were decoded from.
pub fn encode_midi(notes: &[NoteEvent], n_frames: usize, config: &TranscriptionConfig) -> Result<Vec<u8>> {
    let tempo_us = config.tempo_us();
    let frame_times = model_frames_to_time(n_frames + 1);

    let time_of = |frame: usize| -> Result<f32> {
        frame_times.get(frame).copied().ok_or_else(|| {
            TranscribeError::encoding_failed(format!(
                "Note frame {} outside posteriorgram of {} frames",
                frame, n_frames
            ))
        })
    };

    let mut events: Vec<(u32, EventRank, MidiMessage)> = Vec::with_capacity(notes.len() * 2);

    for note in notes {
        let start_time = time_of(note.start)?;
        let end_time = time_of(note.end)?;
        let start_tick = time_to_ticks(start_time, tempo_us);
        let end_tick = time_to_ticks(end_time, tempo_us);
        let key = u7::new(note.pitch.min(127));
        let velocity = (note.amplitude * 127.0).clamp(0.0, 127.0) as u8;

        events.push((
            start_tick,
            EventRank::NoteOn,
            MidiMessage::NoteOn {
                key,
                vel: u7::new(velocity),
            },
        ));

        match note.pitch_bends.as_deref() {
            Some([bend]) => events.push((start_tick, EventRank::Bend, pitch_bend(*bend))),
            Some(bends) if bends.len() > 1 => {
                let step = (end_time - start_time) / (bends.len() - 1) as f32;
                for (i, bend) in bends.iter().enumerate() {
                    let tick = time_to_ticks(start_time + i as f32 * step, tempo_us).min(end_tick);
                    events.push((tick, EventRank::Bend, pitch_bend(*bend)));
                }
            }
            _ => {}
        }

        events.push((
            end_tick,
            EventRank::NoteOff,
            MidiMessage::NoteOff {
                key,
                vel: u7::new(0),
            },
        ));
    }

    events.sort_by_key(|(tick, rank, _)| (*tick, *rank));

    let mut instrument: Vec<TrackEvent<'static>> = Vec::with_capacity(events.len() + 2);
    instrument.push(TrackEvent {
        delta: u28::new(0),
        kind: channel_event(MidiMessage::ProgramChange {
            program: u7::new(PROGRAM),
        }),
    });

    let mut last_tick = 0u32;
    for (tick, _, message) in events {
        instrument.push(TrackEvent {
            delta: u28::new(tick - last_tick),
            kind: channel_event(message),
        });
        last_tick = tick;
    }
    instrument.push(end_of_track());

    let conductor = vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo_us))),
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::TimeSignature(4, 2, 24, 8)),
        },
        end_of_track(),
    ];

    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));
    smf.tracks.push(conductor);
    smf.tracks.push(instrument);

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes)
        .map_err(|e| TranscribeError::encoding_failed(format!("Failed to write MIDI: {}", e)))?;

    Ok(bytes)
}

fn pitch_bend(bend: i32) -> MidiMessage {
    let value = (bend * BEND_PER_BIN + PITCH_BEND_CENTER).clamp(0, PITCH_BEND_MAX);
    MidiMessage::PitchBend {
        bend: PitchBend(u14::new(value as u16)),
    }
}

fn channel_event(message: MidiMessage) -> TrackEventKind<'static> {
    TrackEventKind::Midi {
        channel: u4::new(0),
        message,
    }
}

fn end_of_track() -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    }
}
