//! Note-event decoding from model posteriorgrams.
//!
//! Onset peaks start notes; each note then runs forward while the frame
//! activation stays above the frame threshold, tolerating short dips. With
//! the melodia trick enabled, energy left over after onset-driven decoding is
//! greedily turned into further notes. Pitch bends are read from the
//! contour matrix around each note's centre bin.

use ndarray::Array2;

use crate::engine::constants::{CONTOURS_BINS_PER_SEMITONE, MAX_FREQ_IDX, MIDI_OFFSET};
use crate::types::{InferenceResult, TranscriptionConfig};

/// Frames of sub-threshold energy tolerated inside a note.
pub const ENERGY_TOL: usize = 11;

/// Contour bins searched either side of a note's centre for pitch bends.
const BEND_BIN_TOLERANCE: isize = 25;

/// Width of the Gaussian weighting applied to the contour search.
const BEND_SIGMA: f32 = 5.0;

/// Frequency of contour bin 0 (A0).
const CONTOUR_BASE_FREQUENCY: f32 = 27.5;

/// One decoded note, in model frames.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteEvent {
    /// First frame (inclusive).
    pub start: usize,
    /// Last frame (exclusive).
    pub end: usize,
    /// MIDI note number.
    pub pitch: u8,
    /// Mean frame activation over the note, 0.0-1.0.
    pub amplitude: f32,
    /// Per-frame bend in contour bins (thirds of a semitone).
    pub pitch_bends: Option<Vec<i32>>,
}

/// Decodes note events from an inference result.
pub fn decode_notes(result: &InferenceResult, config: &TranscriptionConfig) -> Vec<NoteEvent> {
    let n_frames = result.frames();
    if n_frames < 3 {
        return Vec::new();
    }

    let (min_bin, max_bin) = pitch_bin_range(config);
    let frames = &result.notes;
    let mut remaining = frames.clone();
    for bin in (0..remaining.ncols()).filter(|b| *b < min_bin || *b > max_bin) {
        remaining.column_mut(bin).fill(0.0);
    }

    let mut notes = Vec::new();
    let min_len = config.min_note_length as usize;

    let mut peaks = find_peaks(&result.onsets, config.onset_threshold, min_bin, max_bin);
    peaks.reverse();

    for (start, bin) in peaks {
        let mut i = start + 1;
        let mut k = 0;
        while i < n_frames - 1 && k < ENERGY_TOL {
            if remaining[[i, bin]] < config.frame_threshold {
                k += 1;
            } else {
                k = 0;
            }
            i += 1;
        }
        let end = i - k;

        if end - start <= min_len {
            continue;
        }

        for t in start..end {
            clear_energy(&mut remaining, t, bin);
        }

        notes.push(NoteEvent {
            start,
            end,
            pitch: bin as u8 + MIDI_OFFSET,
            amplitude: mean_activation(frames, start, end, bin),
            pitch_bends: None,
        });
    }

    if config.use_melodia_trick {
        melodia_trick(&mut remaining, frames, config.frame_threshold, min_len, &mut notes);
    }

    if config.include_pitch_bends {
        add_pitch_bends(&result.contours, &mut notes);
        drop_overlapping_pitch_bends(&mut notes);
    }

    notes
}

/// Returns the inclusive pitch-bin range allowed by the frequency bounds.
pub fn pitch_bin_range(config: &TranscriptionConfig) -> (usize, usize) {
    let to_bin = |hz: f32| -> usize {
        let bin = (hz_to_midi(hz) - MIDI_OFFSET as f32).round();
        bin.clamp(0.0, MAX_FREQ_IDX as f32) as usize
    };
    (to_bin(config.min_frequency), to_bin(config.max_frequency))
}

/// Local maxima in time above `threshold`, ordered by frame then bin.
fn find_peaks(onsets: &Array2<f32>, threshold: f32, min_bin: usize, max_bin: usize) -> Vec<(usize, usize)> {
    let (n_frames, n_bins) = onsets.dim();
    let last_bin = max_bin.min(n_bins.saturating_sub(1));
    let mut peaks = Vec::new();

    for t in 1..n_frames.saturating_sub(1) {
        for f in min_bin..=last_bin {
            let v = onsets[[t, f]];
            if v > threshold && v > onsets[[t - 1, f]] && v > onsets[[t + 1, f]] {
                peaks.push((t, f));
            }
        }
    }

    peaks
}

fn melodia_trick(
    remaining: &mut Array2<f32>,
    frames: &Array2<f32>,
    threshold: f32,
    min_len: usize,
    notes: &mut Vec<NoteEvent>,
) {
    let n_frames = remaining.nrows() as isize;
    let tol = ENERGY_TOL as isize;

    while let Some((mid, bin)) = argmax_above(remaining, threshold) {
        remaining[[mid, bin]] = 0.0;

        let mut i = mid as isize + 1;
        let mut k = 0;
        while i < n_frames - 1 && k < tol {
            if remaining[[i as usize, bin]] < threshold {
                k += 1;
            } else {
                k = 0;
            }
            clear_energy(remaining, i as usize, bin);
            i += 1;
        }
        let end = i - 1 - k;

        let mut i = mid as isize - 1;
        let mut k = 0;
        while i > 0 && k < tol {
            if remaining[[i as usize, bin]] < threshold {
                k += 1;
            } else {
                k = 0;
            }
            clear_energy(remaining, i as usize, bin);
            i -= 1;
        }
        let start = i + 1 + k;

        if end - start <= min_len as isize {
            continue;
        }

        let (start, end) = (start as usize, end as usize);
        notes.push(NoteEvent {
            start,
            end,
            pitch: bin as u8 + MIDI_OFFSET,
            amplitude: mean_activation(frames, start, end, bin),
            pitch_bends: None,
        });
    }
}

fn argmax_above(energy: &Array2<f32>, threshold: f32) -> Option<(usize, usize)> {
    let mut best: Option<((usize, usize), f32)> = None;
    for (idx, &v) in energy.indexed_iter() {
        if v > threshold && best.map_or(true, |(_, b)| v > b) {
            best = Some((idx, v));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Zeroes a bin and its neighbours at frame `t`.
fn clear_energy(energy: &mut Array2<f32>, t: usize, bin: usize) {
    energy[[t, bin]] = 0.0;
    if bin > 0 {
        energy[[t, bin - 1]] = 0.0;
    }
    if bin < MAX_FREQ_IDX && bin + 1 < energy.ncols() {
        energy[[t, bin + 1]] = 0.0;
    }
}

fn mean_activation(frames: &Array2<f32>, start: usize, end: usize, bin: usize) -> f32 {
    let sum: f32 = (start..end).map(|t| frames[[t, bin]]).sum();
    sum / (end - start) as f32
}

fn hz_to_midi(hz: f32) -> f32 {
    12.0 * (hz / 440.0).log2() + 69.0
}

fn midi_to_contour_bin(pitch: u8) -> f32 {
    let hz = 440.0 * 2f32.powf((pitch as f32 - 69.0) / 12.0);
    12.0 * CONTOURS_BINS_PER_SEMITONE as f32 * (hz / CONTOUR_BASE_FREQUENCY).log2()
}

fn add_pitch_bends(contours: &Array2<f32>, notes: &mut [NoteEvent]) {
    let n_bins = contours.ncols() as isize;
    let tol = BEND_BIN_TOLERANCE;
    let window_len = tol * 2 + 1;

    let gaussian: Vec<f32> = (0..window_len)
        .map(|i| {
            let x = (i - tol) as f32;
            (-(x * x) / (2.0 * BEND_SIGMA * BEND_SIGMA)).exp()
        })
        .collect();

    for note in notes.iter_mut() {
        let centre = midi_to_contour_bin(note.pitch).round() as isize;

        let freq_start = (centre - tol).max(0);
        let freq_end = (centre + tol + 1).min(n_bins);
        let gauss_start = (tol - centre).max(0);
        let gauss_end = window_len - (centre - (n_bins - tol - 1)).max(0);
        let shift = tol - (tol - centre).max(0);

        let bends = (note.start..note.end)
            .map(|t| {
                let mut best = f32::NEG_INFINITY;
                let mut best_bin = freq_start;
                let mut f = freq_start;
                let mut g = gauss_start;
                while f < freq_end && g < gauss_end {
                    let weighted = contours[[t, f as usize]] * gaussian[g as usize];
                    if weighted > best {
                        best = weighted;
                        best_bin = f;
                    }
                    f += 1;
                    g += 1;
                }
                ((best_bin - freq_start) - shift) as i32
            })
            .collect();

        note.pitch_bends = Some(bends);
    }
}

/// Removes bends from notes that overlap in time; a single channel can
/// only carry one bend at a time.
fn drop_overlapping_pitch_bends(notes: &mut [NoteEvent]) {
    notes.sort_by(|a, b| {
        (a.start, a.end, a.pitch)
            .cmp(&(b.start, b.end, b.pitch))
            .then(a.amplitude.total_cmp(&b.amplitude))
    });

    for i in 0..notes.len() {
        for j in i + 1..notes.len() {
            if notes[j].start >= notes[i].end {
                break;
            }
            notes[i].pitch_bends = None;
            notes[j].pitch_bends = None;
        }
    }
}
