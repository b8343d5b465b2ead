use tracing::trace;

use super::{fnv1a, Device, DeviceSetup, DeviceState, DeviceType, FNV_OFFSET};
use super::{OptionDecl, OptionKind, OutputLines, RomRequirement};
use crate::dispatch::Bus;
use crate::memory::AccessWidth;
use crate::{ConfigError, SnapshotError};

/// Number of independent playback voices.
pub const SAMPLE_CHIP_VOICES: usize = 4;

/// Bytes per entry of the phrase table at the bottom of sample space.
const PHRASE_ENTRY_BYTES: u32 = 8;
/// Sample-space addresses are 18 bits wide.
const SAMPLE_ADDRESS_MASK: u32 = 0x3_FFFF;
const PENDING_FLAG: u64 = 0x1000;

const OPTIONS: &[OptionDecl] = &[OptionDecl {
    name: "pin7",
    kind: OptionKind::Text {
        choices: &["high", "low"],
    },
    required: true,
}];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Voice {
    active: bool,
    address: u32,
    end: u32,
    nibble: bool,
    attenuation: u8,
    pending: Option<(u8, u8)>,
}

/// Four-voice ADPCM sample player in the MSM6295 class.
///
/// The chip masters one 18-bit space holding a phrase table followed by
/// sample data. The host drives it through a single register: a byte with
/// bit 7 set latches a phrase number, and the next byte starts that phrase on
/// the voices named in bits 4-7 with the attenuation in bits 0-3. A byte with
/// bit 7 clear and no phrase latched stops the voices named in bits 3-6.
/// Reads return `0xf0` with one bit per playing voice.
///
/// Playback advances one sample every 132 clocks (`pin7 = high`) or 165
/// clocks (`pin7 = low`) and fetches one byte from sample space every second
/// sample. Audio output is not produced; fetched bytes are folded into a
/// fingerprint instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleChip {
    divider: u64,
    phrase: Option<u8>,
    voices: [Voice; SAMPLE_CHIP_VOICES],
    residue: u64,
    samples: u64,
    sample_hash: u64,
}

impl SampleChip {
    /// Registry entry for this model. The required ROM region backs the
    /// chip's sample space; the chip itself only reaches it through that map.
    pub const DEVICE_TYPE: DeviceType = DeviceType {
        name: "sample-chip",
        options: OPTIONS,
        needs_clock: true,
        rom: RomRequirement::Required { min_size: 0x400 },
        spaces: 1,
        factory: Self::create,
    };

    /// Creates a chip; `pin7_high` selects the faster sample rate.
    #[must_use]
    pub const fn new(pin7_high: bool) -> Self {
        Self {
            divider: if pin7_high { 132 } else { 165 },
            phrase: None,
            voices: [Voice {
                active: false,
                address: 0,
                end: 0,
                nibble: false,
                attenuation: 0,
                pending: None,
            }; SAMPLE_CHIP_VOICES],
            residue: 0,
            samples: 0,
            sample_hash: FNV_OFFSET,
        }
    }

    fn create(setup: &DeviceSetup<'_>) -> Result<Box<dyn Device>, ConfigError> {
        let pin7_high = match setup.text("pin7") {
            Some("high") => true,
            Some("low") => false,
            other => {
                return Err(setup.invalid("pin7", format!("unsupported level {other:?}")));
            }
        };
        Ok(Box::new(Self::new(pin7_high)))
    }

    /// Clocks per sample.
    #[must_use]
    pub const fn divider(&self) -> u64 {
        self.divider
    }

    /// Bitmask of playing voices, voice 0 in bit 0.
    #[must_use]
    pub fn active_voices(&self) -> u8 {
        self.voices
            .iter()
            .enumerate()
            .filter(|(_, voice)| voice.active)
            .fold(0, |mask, (index, _)| mask | (1 << index))
    }

    /// Samples generated since reset.
    #[must_use]
    pub const fn samples(&self) -> u64 {
        self.samples
    }

    /// Fingerprint of every sample byte fetched since reset.
    #[must_use]
    pub const fn sample_hash(&self) -> u64 {
        self.sample_hash
    }

    fn start_pending(&mut self, bus: &mut Bus<'_>) {
        for (index, voice) in self.voices.iter_mut().enumerate() {
            let Some((phrase, attenuation)) = voice.pending.take() else {
                continue;
            };
            let base = u32::from(phrase) * PHRASE_ENTRY_BYTES;
            let mut entry = [0_u8; 6];
            for (offset, byte) in (0_u32..).zip(entry.iter_mut()) {
                *byte = bus.read8(base + offset);
            }
            let start = decode_address(entry[0], entry[1], entry[2]);
            let end = decode_address(entry[3], entry[4], entry[5]);
            if start >= end {
                trace!(voice = index, phrase, start, end, "empty phrase ignored");
                continue;
            }
            *voice = Voice {
                active: true,
                address: start,
                end,
                nibble: false,
                attenuation,
                pending: None,
            };
        }
    }

    fn step_sample(&mut self, bus: &mut Bus<'_>) {
        for voice in self.voices.iter_mut().filter(|voice| voice.active) {
            if voice.nibble {
                voice.address += 1;
                if voice.address > voice.end {
                    voice.active = false;
                }
            } else {
                let byte = bus.read8(voice.address & SAMPLE_ADDRESS_MASK);
                self.sample_hash = fnv1a(self.sample_hash, byte);
            }
            voice.nibble = !voice.nibble;
        }
        self.samples += 1;
    }
}

fn decode_address(high: u8, mid: u8, low: u8) -> u32 {
    (u32::from(high & 0x03) << 16) | (u32::from(mid) << 8) | u32::from(low)
}

impl Device for SampleChip {
    fn type_name(&self) -> &'static str {
        "sample-chip"
    }

    fn read(&mut self, _offset: u32, _width: AccessWidth) -> u32 {
        0xF0 | u32::from(self.active_voices())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write(&mut self, _offset: u32, _width: AccessWidth, value: u32, _lines: &mut OutputLines) {
        let command = value as u8;
        if let Some(phrase) = self.phrase.take() {
            for (index, voice) in self.voices.iter_mut().enumerate() {
                if command & (0x10 << index) != 0 {
                    voice.pending = Some((phrase, command & 0x0F));
                }
            }
        } else if command & 0x80 != 0 {
            self.phrase = Some(command & 0x7F);
        } else {
            for (index, voice) in self.voices.iter_mut().enumerate() {
                if command & (0x08 << index) != 0 {
                    voice.active = false;
                    voice.pending = None;
                }
            }
        }
    }

    fn reset(&mut self) {
        *self = Self::new(self.divider == 132);
    }

    fn save_state(&self) -> DeviceState {
        let mut state = DeviceState::new();
        state.put_u64(
            "phrase",
            self.phrase.map_or(0, |phrase| PENDING_FLAG | u64::from(phrase)),
        );
        state.put_u64("residue", self.residue);
        state.put_u64("samples", self.samples);
        state.put_u64("sample_hash", self.sample_hash);
        for (index, voice) in self.voices.iter().enumerate() {
            let key = |field: &str| format!("voice{index}.{field}");
            state.put_bool(&key("active"), voice.active);
            state.put_u64(&key("address"), u64::from(voice.address));
            state.put_u64(&key("end"), u64::from(voice.end));
            state.put_bool(&key("nibble"), voice.nibble);
            state.put_u64(&key("attenuation"), u64::from(voice.attenuation));
            state.put_u64(
                &key("pending"),
                voice.pending.map_or(0, |(phrase, attenuation)| {
                    PENDING_FLAG | (u64::from(phrase) << 4) | u64::from(attenuation)
                }),
            );
        }
        state
    }

    #[allow(clippy::cast_possible_truncation)]
    fn restore_state(&mut self, state: &DeviceState) -> Result<(), SnapshotError> {
        let flagged = |field: &str, limit: u64| -> Result<Option<u64>, SnapshotError> {
            match state.u64(field)? {
                0 => Ok(None),
                raw if raw & PENDING_FLAG != 0 && raw & !PENDING_FLAG <= limit => {
                    Ok(Some(raw & !PENDING_FLAG))
                }
                _ => Err(SnapshotError::FieldRange {
                    field: field.to_owned(),
                }),
            }
        };

        let mut restored = Self::new(self.divider == 132);
        restored.phrase = flagged("phrase", 0x7F)?.map(|phrase| phrase as u8);
        restored.residue = state.u64("residue")?;
        restored.samples = state.u64("samples")?;
        restored.sample_hash = state.u64("sample_hash")?;
        for (index, voice) in restored.voices.iter_mut().enumerate() {
            let key = |field: &str| format!("voice{index}.{field}");
            voice.active = state.bool(&key("active"))?;
            voice.address = state.u32(&key("address"))?;
            voice.end = state.u32(&key("end"))?;
            voice.nibble = state.bool(&key("nibble"))?;
            voice.attenuation = match state.u64(&key("attenuation"))? {
                value @ 0..=0x0F => value as u8,
                _ => {
                    return Err(SnapshotError::FieldRange {
                        field: key("attenuation"),
                    })
                }
            };
            voice.pending = flagged(&key("pending"), 0x7FF)?
                .map(|packed| ((packed >> 4) as u8, (packed & 0x0F) as u8));
            if voice.address > SAMPLE_ADDRESS_MASK {
                return Err(SnapshotError::FieldRange {
                    field: key("address"),
                });
            }
            if voice.end > SAMPLE_ADDRESS_MASK || (voice.active && voice.address > voice.end + 1) {
                return Err(SnapshotError::FieldRange { field: key("end") });
            }
        }
        *self = restored;
        Ok(())
    }

    fn is_executable(&self) -> bool {
        true
    }

    fn execute(&mut self, bus: &mut Bus<'_>, cycles: u64) -> u64 {
        self.start_pending(bus);
        let total = self.residue + cycles;
        for _ in 0..total / self.divider {
            self.step_sample(bus);
        }
        self.residue = total % self.divider;
        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_address, SampleChip};
    use crate::device::{Device, OutputLines};
    use crate::memory::AccessWidth;
    use crate::SnapshotError;

    fn command(chip: &mut SampleChip, byte: u32) {
        chip.write(0, AccessWidth::Byte, byte, &mut OutputLines::default());
    }

    #[test]
    fn phrase_then_voice_mask_queues_a_start() {
        let mut chip = SampleChip::new(true);
        command(&mut chip, 0x81);
        command(&mut chip, 0x23);
        let state = chip.save_state();
        assert_eq!(state.u64("voice1.pending"), Ok(0x1000 | (1 << 4) | 3));
        assert_eq!(state.u64("voice0.pending"), Ok(0));
        assert_eq!(state.u64("phrase"), Ok(0));
        assert_eq!(chip.read(0, AccessWidth::Byte), 0xF0);
    }

    #[test]
    fn stop_command_cancels_queued_voices() {
        let mut chip = SampleChip::new(false);
        assert_eq!(chip.divider(), 165);
        command(&mut chip, 0x80);
        command(&mut chip, 0xF0);
        command(&mut chip, 0x08 | 0x40);
        let state = chip.save_state();
        assert_eq!(state.u64("voice0.pending"), Ok(0));
        assert_ne!(state.u64("voice1.pending"), Ok(0));
        assert_eq!(state.u64("voice3.pending"), Ok(0));
    }

    #[test]
    fn phrase_addresses_are_eighteen_bits() {
        assert_eq!(decode_address(0xFF, 0x12, 0x34), 0x3_1234);
        assert_eq!(decode_address(0x00, 0x04, 0x00), 0x400);
    }

    #[test]
    fn state_round_trips_and_rejects_bad_fields() {
        let mut chip = SampleChip::new(true);
        command(&mut chip, 0x85);
        let saved = chip.save_state();
        chip.reset();
        chip.restore_state(&saved).expect("own state");
        assert_eq!(chip.save_state(), saved);

        let mut corrupt = saved;
        corrupt.put_u64("voice2.attenuation", 0x40);
        assert!(chip.restore_state(&corrupt).is_err());
    }

    #[test]
    fn voice_addresses_outside_sample_space_are_rejected() {
        let mut chip = SampleChip::new(true);
        let idle = chip.save_state();
        let mut corrupt = idle.clone();
        corrupt.put_bool("voice0.active", true);
        corrupt.put_bool("voice0.nibble", true);
        corrupt.put_u64("voice0.address", u64::from(u32::MAX));
        corrupt.put_u64("voice0.end", u64::from(u32::MAX));
        assert_eq!(
            chip.restore_state(&corrupt),
            Err(SnapshotError::FieldRange {
                field: "voice0.address".to_owned()
            })
        );

        corrupt.put_u64("voice0.address", 0x500);
        corrupt.put_u64("voice0.end", 0x400);
        assert!(chip.restore_state(&corrupt).is_err());
        assert_eq!(chip.save_state(), idle);

        corrupt.put_u64("voice0.address", 0x401);
        assert!(chip.restore_state(&corrupt).is_ok());
        assert_eq!(chip.active_voices(), 1);
    }
}
