//! The traded entity and its fixed-size slot codec.
//!
//! A [`Payload`] carries only the attributes the orchestration engine and
//! the clone-request sub-protocol make decisions on. Titles translate the
//! device's own slot format to and from this record; the codec here is the
//! reference slot layout used by the bundled title profile and the mock
//! device.

use serde::{Deserialize, Serialize};

/// Size in bytes of one encoded box slot.
pub const SLOT_SIZE: usize = 0x158;

/// Short signature (encryption constant, sanity word, checksum) used to
/// notice that a slot's contents changed.
pub type Fingerprint = [u8; 8];

/// Length of every name field in UTF-16 code units, excluding terminator.
const NAME_UNITS: usize = 12;

mod layout {
    pub const EC: usize = 0x00;
    pub const SANITY: usize = 0x04;
    pub const CHECKSUM: usize = 0x06;
    pub const SPECIES: usize = 0x08;
    pub const HELD_ITEM: usize = 0x0A;
    pub const TID16: usize = 0x0C;
    pub const SID16: usize = 0x0E;
    pub const PID: usize = 0x10;
    pub const FORM: usize = 0x14;
    pub const NATURE: usize = 0x15;
    pub const BALL: usize = 0x16;
    pub const TERA: usize = 0x17;
    pub const FLAGS: usize = 0x18;
    pub const VERSION: usize = 0x19;
    pub const LANGUAGE: usize = 0x1A;
    pub const OT_GENDER: usize = 0x1B;
    pub const GENDER: usize = 0x1C;
    pub const MET_LEVEL: usize = 0x1D;
    pub const MET_LOCATION: usize = 0x1E;
    pub const EGG_LOCATION: usize = 0x20;
    pub const EVS: usize = 0x22;
    pub const IVS: usize = 0x28;
    pub const MARK_VALUE: usize = 0x2E;
    pub const TRACKER: usize = 0x30;
    pub const LEVEL: usize = 0x38;
    pub const HT_LANGUAGE: usize = 0x39;
    pub const HT_GENDER: usize = 0x3A;
    pub const HT_FRIENDSHIP: usize = 0x3B;
    pub const NICKNAME: usize = 0x40;
    pub const OT_NAME: usize = 0x60;
    pub const HT_NAME: usize = 0x80;
}

const FLAG_EGG: u8 = 0b001;
const FLAG_FATEFUL: u8 = 0b010;
const FLAG_NICKNAMED: u8 = 0b100;

/// One tradeable entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub encryption_constant: u32,
    /// Checksum as stored; see [`Payload::checksum_valid`].
    pub checksum: u16,
    pub species: u16,
    pub form: u8,
    pub held_item: u16,
    pub tid16: u16,
    pub sid16: u16,
    pub pid: u32,
    pub nature: u8,
    pub ball: u8,
    pub tera_type_override: u8,
    pub is_egg: bool,
    pub fateful_encounter: bool,
    pub is_nicknamed: bool,
    pub version: u8,
    pub language: u8,
    pub ot_gender: u8,
    pub gender: u8,
    pub level: u8,
    pub met_level: u8,
    pub met_location: u16,
    pub egg_location: u16,
    pub evs: [u8; 6],
    pub ivs: [u8; 6],
    pub mark_value: u16,
    pub tracker: u64,
    pub nickname: String,
    pub ot_name: String,
    pub ht_name: String,
    pub ht_language: u8,
    pub ht_gender: u8,
    pub ht_friendship: u8,
}

impl Payload {
    /// An empty slot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the slot holds nothing.
    pub fn is_empty(&self) -> bool {
        self.species == 0
    }

    /// Hatched from an egg, or still one.
    pub fn was_egg(&self) -> bool {
        self.is_egg || self.egg_location != 0
    }

    /// Combined 32-bit trainer id.
    pub fn id32(&self) -> u32 {
        (u32::from(self.sid16) << 16) | u32::from(self.tid16)
    }

    /// Seven-digit display trainer id.
    pub fn display_tid(&self) -> u32 {
        self.id32() % 1_000_000
    }

    /// Four-digit display secret id.
    pub fn display_sid(&self) -> u32 {
        self.id32() / 1_000_000
    }

    /// Set the trainer id from its display form.
    pub fn set_display_ids(&mut self, tid7: u32, sid7: u32) {
        let id32 = sid7.wrapping_mul(1_000_000).wrapping_add(tid7);
        self.tid16 = (id32 & 0xFFFF) as u16;
        self.sid16 = (id32 >> 16) as u16;
    }

    /// XOR of the PID halves and the trainer id halves.
    pub fn shiny_xor(&self) -> u16 {
        let pid_high = (self.pid >> 16) as u16;
        let pid_low = (self.pid & 0xFFFF) as u16;
        pid_high ^ pid_low ^ self.tid16 ^ self.sid16
    }

    pub fn is_shiny(&self) -> bool {
        self.shiny_xor() < 16
    }

    /// EV total across all six stats.
    pub fn ev_total(&self) -> u32 {
        self.evs.iter().map(|&ev| u32::from(ev)).sum()
    }

    /// Recompute and store the checksum.
    pub fn refresh_checksum(&mut self) {
        self.checksum = self.compute_checksum();
    }

    /// Whether the stored checksum matches the contents.
    pub fn checksum_valid(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    fn compute_checksum(&self) -> u16 {
        let bytes = self.encode_body();
        checksum_of(&bytes)
    }

    /// Signature of the encoded slot header.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.encryption_constant.to_le_bytes());
        out[6..].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }

    /// Content hash used to tell two offers apart regardless of checksum.
    pub fn detail_hash(&self) -> [u8; 32] {
        let bytes = self.encode_body();
        *blake3::hash(&bytes[layout::SPECIES..]).as_bytes()
    }

    /// Encode into one slot, writing the stored checksum.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = self.encode_body();
        put_u16(&mut bytes, layout::CHECKSUM, self.checksum);
        bytes
    }

    /// Decode one slot. Short buffers are zero-extended.
    pub fn decode(data: &[u8]) -> Self {
        let mut bytes = vec![0u8; SLOT_SIZE];
        let len = data.len().min(SLOT_SIZE);
        bytes[..len].copy_from_slice(&data[..len]);

        let flags = bytes[layout::FLAGS];
        let mut evs = [0u8; 6];
        evs.copy_from_slice(&bytes[layout::EVS..layout::EVS + 6]);
        let mut ivs = [0u8; 6];
        ivs.copy_from_slice(&bytes[layout::IVS..layout::IVS + 6]);

        Self {
            encryption_constant: get_u32(&bytes, layout::EC),
            checksum: get_u16(&bytes, layout::CHECKSUM),
            species: get_u16(&bytes, layout::SPECIES),
            form: bytes[layout::FORM],
            held_item: get_u16(&bytes, layout::HELD_ITEM),
            tid16: get_u16(&bytes, layout::TID16),
            sid16: get_u16(&bytes, layout::SID16),
            pid: get_u32(&bytes, layout::PID),
            nature: bytes[layout::NATURE],
            ball: bytes[layout::BALL],
            tera_type_override: bytes[layout::TERA],
            is_egg: flags & FLAG_EGG != 0,
            fateful_encounter: flags & FLAG_FATEFUL != 0,
            is_nicknamed: flags & FLAG_NICKNAMED != 0,
            version: bytes[layout::VERSION],
            language: bytes[layout::LANGUAGE],
            ot_gender: bytes[layout::OT_GENDER],
            gender: bytes[layout::GENDER],
            level: bytes[layout::LEVEL],
            met_level: bytes[layout::MET_LEVEL],
            met_location: get_u16(&bytes, layout::MET_LOCATION),
            egg_location: get_u16(&bytes, layout::EGG_LOCATION),
            evs,
            ivs,
            mark_value: get_u16(&bytes, layout::MARK_VALUE),
            tracker: get_u64(&bytes, layout::TRACKER),
            nickname: get_name(&bytes, layout::NICKNAME),
            ot_name: get_name(&bytes, layout::OT_NAME),
            ht_name: get_name(&bytes, layout::HT_NAME),
            ht_language: bytes[layout::HT_LANGUAGE],
            ht_gender: bytes[layout::HT_GENDER],
            ht_friendship: bytes[layout::HT_FRIENDSHIP],
        }
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; SLOT_SIZE];
        put_u32(&mut bytes, layout::EC, self.encryption_constant);
        put_u16(&mut bytes, layout::SANITY, 0);
        put_u16(&mut bytes, layout::SPECIES, self.species);
        put_u16(&mut bytes, layout::HELD_ITEM, self.held_item);
        put_u16(&mut bytes, layout::TID16, self.tid16);
        put_u16(&mut bytes, layout::SID16, self.sid16);
        put_u32(&mut bytes, layout::PID, self.pid);
        bytes[layout::FORM] = self.form;
        bytes[layout::NATURE] = self.nature;
        bytes[layout::BALL] = self.ball;
        bytes[layout::TERA] = self.tera_type_override;

        let mut flags = 0u8;
        if self.is_egg {
            flags |= FLAG_EGG;
        }
        if self.fateful_encounter {
            flags |= FLAG_FATEFUL;
        }
        if self.is_nicknamed {
            flags |= FLAG_NICKNAMED;
        }
        bytes[layout::FLAGS] = flags;

        bytes[layout::VERSION] = self.version;
        bytes[layout::LANGUAGE] = self.language;
        bytes[layout::OT_GENDER] = self.ot_gender;
        bytes[layout::GENDER] = self.gender;
        bytes[layout::MET_LEVEL] = self.met_level;
        put_u16(&mut bytes, layout::MET_LOCATION, self.met_location);
        put_u16(&mut bytes, layout::EGG_LOCATION, self.egg_location);
        bytes[layout::EVS..layout::EVS + 6].copy_from_slice(&self.evs);
        bytes[layout::IVS..layout::IVS + 6].copy_from_slice(&self.ivs);
        put_u16(&mut bytes, layout::MARK_VALUE, self.mark_value);
        put_u64(&mut bytes, layout::TRACKER, self.tracker);
        bytes[layout::LEVEL] = self.level;
        bytes[layout::HT_LANGUAGE] = self.ht_language;
        bytes[layout::HT_GENDER] = self.ht_gender;
        bytes[layout::HT_FRIENDSHIP] = self.ht_friendship;
        put_name(&mut bytes, layout::NICKNAME, &self.nickname);
        put_name(&mut bytes, layout::OT_NAME, &self.ot_name);
        put_name(&mut bytes, layout::HT_NAME, &self.ht_name);
        bytes
    }
}

/// Wrapping sum of the little-endian words after the header.
fn checksum_of(bytes: &[u8]) -> u16 {
    bytes[layout::SPECIES..]
        .chunks_exact(2)
        .fold(0u16, |acc, w| acc.wrapping_add(u16::from_le_bytes([w[0], w[1]])))
}

/// Read the fingerprint out of raw slot bytes.
pub fn fingerprint_of(bytes: &[u8]) -> Fingerprint {
    let mut out = [0u8; 8];
    let len = bytes.len().min(8);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

fn get_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn get_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn get_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

fn put_u16(bytes: &mut [u8], at: usize, value: u16) {
    bytes[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(bytes: &mut [u8], at: usize, value: u64) {
    bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

/// Decode a zero-terminated UTF-16LE name field.
pub fn get_name(bytes: &[u8], at: usize) -> String {
    let units: Vec<u16> = bytes[at..at + (NAME_UNITS + 1) * 2]
        .chunks_exact(2)
        .map(|w| u16::from_le_bytes([w[0], w[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Encode a name field, truncating to the field width.
pub fn put_name(bytes: &mut [u8], at: usize, name: &str) {
    let field = &mut bytes[at..at + (NAME_UNITS + 1) * 2];
    field.fill(0);
    for (i, unit) in name.encode_utf16().take(NAME_UNITS).enumerate() {
        field[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Payload {
        let mut pk = Payload {
            encryption_constant: 0xDEAD_BEEF,
            species: 25,
            form: 0,
            held_item: 1,
            tid16: 12345,
            sid16: 54321,
            pid: 0x1234_5678,
            nature: 3,
            ball: 4,
            version: 50,
            language: 2,
            level: 50,
            evs: [252, 0, 4, 0, 0, 252],
            ivs: [31; 6],
            nickname: "Sparky".to_string(),
            is_nicknamed: true,
            ot_name: "Ash".to_string(),
            ..Payload::default()
        };
        pk.refresh_checksum();
        pk
    }

    #[test]
    fn encode_decode_preserves_fields() {
        let pk = sample();
        let bytes = pk.encode();
        assert_eq!(bytes.len(), SLOT_SIZE);
        let back = Payload::decode(&bytes);
        assert_eq!(back, pk);
        assert!(back.checksum_valid());
    }

    #[test]
    fn checksum_detects_tampering() {
        let pk = sample();
        let mut bytes = pk.encode();
        bytes[0x08] ^= 0xFF;
        assert!(!Payload::decode(&bytes).checksum_valid());
    }

    #[test]
    fn fingerprint_matches_encoded_header() {
        let pk = sample();
        assert_eq!(pk.fingerprint(), fingerprint_of(&pk.encode()));
    }

    #[test]
    fn display_ids_round_trip() {
        let mut pk = Payload::default();
        pk.set_display_ids(123_456, 1_234);
        assert_eq!(pk.display_tid(), 123_456);
        assert_eq!(pk.display_sid(), 1_234);
    }

    #[test]
    fn shiny_xor_zero_is_square() {
        let mut pk = Payload {
            tid16: 0x1111,
            sid16: 0x2222,
            ..Payload::default()
        };
        let low = 0x0F0F_u32;
        let high = u32::from(0x1111_u16 ^ 0x2222 ^ 0x0F0F);
        pk.pid = (high << 16) | low;
        assert_eq!(pk.shiny_xor(), 0);
        assert!(pk.is_shiny());
    }

    #[test]
    fn names_truncate_to_field_width() {
        let pk = Payload {
            nickname: "ABCDEFGHIJKLMNOP".to_string(),
            ..Payload::default()
        };
        let back = Payload::decode(&pk.encode());
        assert_eq!(back.nickname, "ABCDEFGHIJKL");
    }

    #[test]
    fn detail_hash_ignores_checksum_but_not_content() {
        let pk = sample();
        let mut stale = pk.clone();
        stale.checksum = 0;
        assert_eq!(pk.detail_hash(), stale.detail_hash());

        let mut other = pk.clone();
        other.held_item = 2;
        assert_ne!(pk.detail_hash(), other.detail_hash());
    }
}
