//! Hall reverb: Freeverb topology tuned for the spatializer send.
//!
//! Eight damped feedback combs in parallel feed four series allpasses per
//! side; the right side is detuned by a fixed spread to decorrelate the tail.

use crate::settings::ReverbPreset;

#[derive(Debug, Clone)]
struct Comb {
    line: Vec<f32>,
    pos: usize,
    feedback: f32,
    damp: f32,
    lowpass: f32,
}

impl Comb {
    fn new(len: usize) -> Self {
        Self {
            line: vec![0.0; len.max(1)],
            pos: 0,
            feedback: 0.0,
            damp: 0.0,
            lowpass: 0.0,
        }
    }

    #[inline]
    fn tick(&mut self, input: f32) -> f32 {
        let out = self.line[self.pos];
        self.lowpass = out * (1.0 - self.damp) + self.lowpass * self.damp;
        self.line[self.pos] = input + self.lowpass * self.feedback;
        self.pos += 1;
        if self.pos == self.line.len() {
            self.pos = 0;
        }
        out
    }

    fn reset(&mut self) {
        self.line.fill(0.0);
        self.lowpass = 0.0;
        self.pos = 0;
    }
}

#[derive(Debug, Clone)]
struct Allpass {
    line: Vec<f32>,
    pos: usize,
}

impl Allpass {
    const FEEDBACK: f32 = 0.5;

    fn new(len: usize) -> Self {
        Self {
            line: vec![0.0; len.max(1)],
            pos: 0,
        }
    }

    #[inline]
    fn tick(&mut self, input: f32) -> f32 {
        let delayed = self.line[self.pos];
        self.line[self.pos] = input + delayed * Self::FEEDBACK;
        self.pos += 1;
        if self.pos == self.line.len() {
            self.pos = 0;
        }
        delayed - input
    }

    fn reset(&mut self) {
        self.line.fill(0.0);
        self.pos = 0;
    }
}

// Delay lengths in samples at 44.1 kHz
const COMB_LENGTHS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_LENGTHS: [usize; 4] = [556, 441, 341, 225];
const SPREAD: usize = 23;
const INPUT_GAIN: f32 = 0.015;

/// Stereo hall reverb with a dry/wet mix.
#[derive(Debug, Clone)]
pub struct Reverb {
    combs: [Vec<Comb>; 2],
    allpasses: [Vec<Allpass>; 2],
    wet_left: f32,
    wet_cross: f32,
    mix: f32,
}

impl Reverb {
    /// Build a reverb for `preset` at `sample_rate` with `mix` wet share.
    pub fn new(sample_rate: f64, preset: ReverbPreset, mix: f64) -> Self {
        let scale = sample_rate / 44100.0;
        let sized = |base: usize, spread: usize| ((base as f64) * scale) as usize + spread;

        let combs = [0, SPREAD].map(|spread| {
            COMB_LENGTHS
                .iter()
                .map(|&len| Comb::new(sized(len, spread)))
                .collect::<Vec<_>>()
        });
        let allpasses = [0, SPREAD].map(|spread| {
            ALLPASS_LENGTHS
                .iter()
                .map(|&len| Allpass::new(sized(len, spread)))
                .collect::<Vec<_>>()
        });

        let mut reverb = Self {
            combs,
            allpasses,
            wet_left: 1.0,
            wet_cross: 0.0,
            mix: 0.0,
        };
        reverb.set_preset(preset);
        reverb.set_mix(mix);
        reverb
    }

    pub fn set_preset(&mut self, preset: ReverbPreset) {
        let (room_size, damping, width) = preset.room();
        let feedback = (room_size * 0.28 + 0.7) as f32;
        let damp = (damping * 0.4) as f32;
        for comb in self.combs.iter_mut().flatten() {
            comb.feedback = feedback;
            comb.damp = damp;
        }
        self.wet_left = (width / 2.0 + 0.5) as f32;
        self.wet_cross = ((1.0 - width) / 2.0) as f32;
    }

    /// Wet share in `[0, 1]`.
    pub fn set_mix(&mut self, mix: f64) {
        self.mix = mix.clamp(0.0, 1.0) as f32;
    }

    pub fn mix(&self) -> f32 {
        self.mix
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let input = (left + right) * INPUT_GAIN;

        let mut tails = [0.0f32; 2];
        for (side, tail) in tails.iter_mut().enumerate() {
            for comb in &mut self.combs[side] {
                *tail += comb.tick(input);
            }
            for allpass in &mut self.allpasses[side] {
                *tail = allpass.tick(*tail);
            }
        }

        let wet_l = tails[0] * self.wet_left + tails[1] * self.wet_cross;
        let wet_r = tails[1] * self.wet_left + tails[0] * self.wet_cross;
        let dry = 1.0 - self.mix;
        (left * dry + wet_l * self.mix, right * dry + wet_r * self.mix)
    }

    /// Mono in, mono out: the input feeds both sides and the tails are averaged.
    #[inline]
    pub fn process_mono(&mut self, sample: f32) -> f32 {
        let (l, r) = self.process(sample, sample);
        (l + r) * 0.5
    }

    /// Process a stereo block in place.
    pub fn process_stereo(&mut self, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            (*l, *r) = self.process(*l, *r);
        }
    }

    /// Process a mono block in place.
    pub fn process_mono_block(&mut self, samples: &mut [f32]) {
        for s in samples {
            *s = self.process_mono(*s);
        }
    }

    /// Clear all delay lines.
    pub fn reset(&mut self) {
        for comb in self.combs.iter_mut().flatten() {
            comb.reset();
        }
        for allpass in self.allpasses.iter_mut().flatten() {
            allpass.reset();
        }
    }
}
