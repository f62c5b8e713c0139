use ringbuf::{HeapCons, traits::Consumer};

use super::{ADSRConfig, Envelope, NoteStart, SourceId, Timbre, VoiceCommand};
use crate::config::OutputConfig;
use crate::timing::Clock;

/// Samples have their own decay; only the tail is shaped.
const SAMPLE_ADSR: ADSRConfig = ADSRConfig {
    attack: 0.005,
    decay: 0.0,
    sustain: 1.0,
    release: 1.0,
};

struct QueuedNote {
    start_frame: u64,
    end_frame: u64,
    note: NoteStart,
}

struct Voice {
    source: SourceId,
    velocity: f32,
    timbre: Timbre,
    envelope: Envelope,
    release_frame: u64,
    phases: Vec<f32>,
    steps: Vec<f32>,
    position: f32,
    rate: f32,
    exhausted: bool,
}

impl Voice {
    fn new(queued: QueuedNote, sample_rate: f32) -> Self {
        let QueuedNote {
            end_frame, note, ..
        } = queued;
        let (steps, rate) = match &note.timbre {
            Timbre::Synth(patch) => (patch.phase_steps(note.pitch, sample_rate), 0.0),
            Timbre::Sample(zone) => (Vec::new(), zone.playback_rate(note.pitch, sample_rate)),
        };
        Self {
            source: note.source,
            velocity: note.velocity,
            phases: vec![0.0; steps.len()],
            steps,
            rate,
            timbre: note.timbre,
            envelope: Envelope::new(),
            release_frame: end_frame,
            position: 0.0,
            exhausted: false,
        }
    }

    fn render(&mut self, dt: f32) -> f32 {
        let raw = match &self.timbre {
            Timbre::Synth(patch) => {
                let mut sum = 0.0;
                for (i, osc) in patch.oscillators.iter().enumerate() {
                    sum += osc.wave.sample(self.phases[i]) * osc.gain;
                    self.phases[i] = (self.phases[i] + self.steps[i]).fract();
                }
                sum
            }
            Timbre::Sample(zone) => match zone.frame_at(self.position) {
                Some(value) => {
                    self.position += self.rate;
                    value
                }
                None => {
                    self.exhausted = true;
                    0.0
                }
            },
        };
        let adsr = match &self.timbre {
            Timbre::Synth(patch) => &patch.adsr,
            Timbre::Sample(_) => &SAMPLE_ADSR,
        };
        raw * self.envelope.advance(adsr, dt) * self.velocity
    }

    fn is_done(&self) -> bool {
        self.exhausted || self.envelope.is_finished()
    }
}

/// Renders queued notes from inside the output callback. Note times arrive on
/// the context clock and are mapped onto frames from the first rendered buffer.
pub struct Mixer {
    consumer: HeapCons<VoiceCommand>,
    clock: Clock,
    sample_rate: f32,
    channels: usize,
    master_gain: f32,
    max_polyphony: usize,
    origin: Option<f64>,
    frame: u64,
    queued: Vec<QueuedNote>,
    voices: Vec<Voice>,
}

impl Mixer {
    pub fn new(consumer: HeapCons<VoiceCommand>, config: &OutputConfig, clock: Clock) -> Self {
        Self {
            consumer,
            clock,
            sample_rate: 44100.0,
            channels: 2,
            master_gain: config.master_gain,
            max_polyphony: config.max_polyphony.max(1),
            origin: None,
            frame: 0,
            queued: Vec::with_capacity(256),
            voices: Vec::with_capacity(64),
        }
    }

    pub fn configure(&mut self, sample_rate: f32, channels: usize) {
        self.sample_rate = sample_rate;
        self.channels = channels.max(1);
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn queued_notes(&self) -> usize {
        self.queued.len()
    }

    pub fn render(&mut self, data: &mut [f32]) {
        let clock = self.clock;
        let origin = *self.origin.get_or_insert_with(|| clock.now());
        self.drain_commands(origin);

        let dt = 1.0 / self.sample_rate;
        for frame in data.chunks_mut(self.channels) {
            self.start_due_notes();

            let mut sample = 0.0;
            for voice in &mut self.voices {
                if self.frame >= voice.release_frame {
                    voice.envelope.release();
                }
                sample += voice.render(dt);
            }
            self.voices.retain(|v| !v.is_done());

            frame.fill(sample * self.master_gain);
            self.frame += 1;
        }
    }

    fn drain_commands(&mut self, origin: f64) {
        while let Some(command) = self.consumer.try_pop() {
            match command {
                VoiceCommand::Start(note) => {
                    let offset = ((note.at - origin) * self.sample_rate as f64).max(0.0) as u64;
                    // Late notes start right away rather than never
                    let start_frame = offset.max(self.frame);
                    let length = (note.duration * self.sample_rate as f64).max(1.0) as u64;
                    self.queued.push(QueuedNote {
                        start_frame,
                        end_frame: start_frame + length,
                        note,
                    });
                }
                VoiceCommand::ReleaseAll(source) => {
                    self.queued.retain(|q| q.note.source != source);
                    for voice in self.voices.iter_mut().filter(|v| v.source == source) {
                        voice.envelope.release();
                    }
                }
            }
        }
    }

    fn start_due_notes(&mut self) {
        let mut i = 0;
        while i < self.queued.len() {
            if self.queued[i].start_frame > self.frame {
                i += 1;
                continue;
            }
            let queued = self.queued.remove(i);
            self.make_room(&queued.note);
            self.voices.push(Voice::new(queued, self.sample_rate));
        }
    }

    fn make_room(&mut self, note: &NoteStart) {
        let mono = matches!(&note.timbre, Timbre::Synth(patch) if patch.mono);
        if mono {
            for voice in self.voices.iter_mut().filter(|v| v.source == note.source) {
                voice.envelope.release();
            }
            return;
        }

        let sounding = self
            .voices
            .iter()
            .filter(|v| v.source == note.source && !v.envelope.is_releasing())
            .count();
        if sounding >= self.max_polyphony {
            // Oldest voice of the source is stolen
            if let Some(oldest) = self.voices.iter().position(|v| v.source == note.source) {
                self.voices.remove(oldest);
            }
        }
    }
}
