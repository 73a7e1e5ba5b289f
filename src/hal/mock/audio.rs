use std::f64::consts::PI;

use crate::hal::traits::SampleSource;

/// Interleaved sine tone, identical on every channel
pub struct SineSource {
    frequency: f64,
    sample_rate: f64,
    amplitude: f64,
    channels: usize,
    phase: f64,
}

impl SineSource {
    pub fn new(frequency: f64, sample_rate: u32, channels: u16) -> Self {
        Self {
            frequency,
            sample_rate: sample_rate as f64,
            amplitude: 0.5,
            channels: channels.max(1) as usize,
            phase: 0.0,
        }
    }

    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude;
        self
    }
}

impl SampleSource for SineSource {
    fn read(&mut self, buffer: &mut [f32]) -> usize {
        let delta_phase = 2.0 * PI * self.frequency / self.sample_rate;
        let frames = buffer.len() / self.channels;

        for frame in buffer.chunks_exact_mut(self.channels) {
            let value = (self.amplitude * self.phase.sin()) as f32;
            frame.fill(value);
            self.phase += delta_phase;
            if self.phase > 2.0 * PI {
                self.phase -= 2.0 * PI;
            }
        }

        frames * self.channels
    }
}

/// Emits the same value forever
pub struct ConstantSource {
    value: f32,
}

impl ConstantSource {
    pub fn new(value: f32) -> Self {
        Self { value }
    }
}

impl SampleSource for ConstantSource {
    fn read(&mut self, buffer: &mut [f32]) -> usize {
        buffer.fill(self.value);
        buffer.len()
    }
}

/// Never has anything ready
pub struct StarvedSource;

impl SampleSource for StarvedSource {
    fn read(&mut self, _buffer: &mut [f32]) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_fills_whole_frames() {
        let mut source = SineSource::new(1000.0, 48000, 2);
        let mut buffer = vec![0.0f32; 9];
        assert_eq!(source.read(&mut buffer), 8);
        assert_eq!(buffer[0], buffer[1]);
        assert_eq!(buffer[2], buffer[3]);
        assert!(buffer[2] > 0.0);
    }

    #[test]
    fn test_sine_stays_within_amplitude() {
        let mut source = SineSource::new(440.0, 44100, 1).with_amplitude(0.8);
        let mut buffer = vec![0.0f32; 4096];
        source.read(&mut buffer);
        assert!(buffer.iter().all(|s| s.abs() <= 0.8 + f32::EPSILON));
    }

    #[test]
    fn test_constant_and_starved() {
        let mut buffer = [0.0f32; 4];
        assert_eq!(ConstantSource::new(0.25).read(&mut buffer), 4);
        assert_eq!(buffer, [0.25; 4]);
        assert_eq!(StarvedSource.read(&mut buffer), 0);
    }
}
