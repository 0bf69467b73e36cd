//! Genned requests: a whole payload described by a packed label.
//!
//! The first six nickname characters are a base-64 number holding a
//! mixed-radix tuple (species, form, nature, tera, ball, size, level flag,
//! shiny flag, gender, ability slot). Twelve-character labels add one IV
//! designator per stat in the last six characters.

use crate::swap::SwapRejection;
use serde::Serialize;
use trade_common::catalog::{GameCatalog, GenderRatio, NATURES, language_name, species};
use trade_common::{Ball, PartnerInfo, TeraType};

pub const ALPHABET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz+-";

/// Successive divisors of the packed value, outermost field first.
pub const DIVISORS: [u64; 9] = [25_272_000, 1_263_600, 50_544, 2_808, 108, 36, 18, 9, 3];

/// Exclusive upper bound of a six-character label value.
pub const LABEL_SPACE: u64 = 64u64.pow(6);

const IV_TITLES: [&str; 6] = ["HP", "Atk", "Def", "Spe", "SpA", "SpD"];

fn digit(c: char) -> Option<u64> {
    ALPHABET.find(c).map(|i| i as u64)
}

/// Whether a nickname is a well-formed genned label.
pub fn is_genned_label(label: &str) -> bool {
    matches!(label.chars().count(), 6 | 12) && label.chars().all(|c| digit(c).is_some())
}

/// Base-64 value of `label`, most significant character first.
pub fn label_value(label: &str) -> Option<u64> {
    label
        .chars()
        .try_fold(0u64, |acc, c| Some(acc.checked_mul(64)? + digit(c)?))
}

/// Fixed-width base-64 rendering of `value`.
pub fn encode_label(mut value: u64, width: usize) -> String {
    let digits: Vec<char> = ALPHABET.chars().collect();
    let mut out = vec!['0'; width];
    for slot in out.iter_mut().rev() {
        *slot = digits[(value % 64) as usize];
        value /= 64;
    }
    out.into_iter().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SizeClass {
    Random,
    Tiny,
    Jumbo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GenderRequest {
    Male,
    Female,
    Unspecified,
}

impl GenderRequest {
    pub fn symbol(self) -> char {
        match self {
            Self::Male => 'M',
            Self::Female => 'F',
            Self::Unspecified => 'U',
        }
    }
}

/// Decoded packed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GennedRequest {
    pub species: u16,
    pub form: u8,
    /// Nature index; values above 24 ask for a random nature.
    pub nature: u16,
    pub tera: u8,
    /// Ball id (already shifted past the "none" ball).
    pub ball: u8,
    pub size: SizeClass,
    pub low_level: bool,
    pub shiny: bool,
    pub gender: GenderRequest,
    pub ability_index: u8,
}

impl GennedRequest {
    /// Split a packed value into its fields.
    pub fn decode(value: u64) -> Self {
        let mut fields = [0u64; 10];
        let mut rest = value;
        for (field, divisor) in fields.iter_mut().zip(DIVISORS) {
            *field = rest / divisor;
            rest %= divisor;
        }
        fields[9] = rest;

        Self {
            species: fields[0] as u16,
            form: fields[1] as u8,
            nature: fields[2] as u16,
            tera: fields[3] as u8,
            ball: fields[4] as u8 + 1,
            size: match fields[5] {
                1 => SizeClass::Tiny,
                2 => SizeClass::Jumbo,
                _ => SizeClass::Random,
            },
            low_level: fields[6] == 1,
            shiny: fields[7] == 1,
            gender: match fields[8] {
                1 => GenderRequest::Female,
                2 => GenderRequest::Unspecified,
                _ => GenderRequest::Male,
            },
            ability_index: fields[9] as u8,
        }
    }

    /// Pack the fields back into one value.
    pub fn encode(&self) -> u64 {
        let size = match self.size {
            SizeClass::Random => 0,
            SizeClass::Tiny => 1,
            SizeClass::Jumbo => 2,
        };
        let gender = match self.gender {
            GenderRequest::Male => 0,
            GenderRequest::Female => 1,
            GenderRequest::Unspecified => 2,
        };
        let fields = [
            u64::from(self.species),
            u64::from(self.form),
            u64::from(self.nature),
            u64::from(self.tera),
            u64::from(self.ball.saturating_sub(1)),
            size,
            u64::from(self.low_level),
            u64::from(self.shiny),
            gender,
        ];
        fields
            .iter()
            .zip(DIVISORS)
            .map(|(field, divisor)| field * divisor)
            .sum::<u64>()
            + u64::from(self.ability_index)
    }

    /// Decode the first six characters of a label.
    pub fn from_label(label: &str) -> Option<Self> {
        let head: String = label.chars().take(6).collect();
        if head.chars().count() < 6 {
            return None;
        }
        label_value(&head).map(Self::decode)
    }
}

/// Requested IVs from the tail of a twelve-character label.
///
/// `W`..`Z` request zero; values of 31 or more leave the stat unspecified.
pub fn iv_request(label: &str) -> Option<[Option<u8>; 6]> {
    let chars: Vec<char> = label.chars().collect();
    if chars.len() != 12 {
        return None;
    }
    let mut ivs = [None; 6];
    for (slot, c) in ivs.iter_mut().zip(&chars[6..]) {
        let c = c.to_ascii_uppercase();
        let value = match c {
            'W' | 'X' | 'Y' | 'Z' => 0,
            other => digit(other)?,
        };
        if value < 31 {
            *slot = Some(value as u8);
        }
    }
    Some(ivs)
}

/// Text handed to the oracle plus a one-line description for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GennedSpec {
    pub text: String,
    pub description: String,
}

/// Build the oracle specification for a decoded request.
pub fn build_spec(
    request: &GennedRequest,
    label: &str,
    catalog: &dyn GameCatalog,
    partner: &PartnerInfo,
) -> Result<GennedSpec, SwapRejection> {
    let reject = |reason: String| SwapRejection::Genned(reason);
    if request.species >= catalog.species_count() {
        return Err(reject(format!("species {} out of range", request.species)));
    }
    let species_name = catalog
        .species_name(request.species)
        .ok_or_else(|| reject(format!("species {} has no name", request.species)))?;

    let form_name = catalog.form_name(request.species, request.form);
    let form = if form_name.is_some() { request.form } else { 0 };
    let ability = catalog
        .ability_name(request.species, form, request.ability_index)
        .ok_or_else(|| reject(format!("no ability in slot {}", request.ability_index)))?;

    let nature_index = if request.nature > 24 {
        fastrand::usize(0..24)
    } else {
        usize::from(request.nature)
    };
    let nature = NATURES[nature_index];

    let mut ball = Ball::from_id(request.ball)
        .map(Ball::name)
        .ok_or_else(|| reject(format!("ball {} is not defined", request.ball)))?
        .to_string();
    let tera = TeraType::from_id(request.tera)
        .ok_or_else(|| reject(format!("tera type {} is not defined", request.tera)))?;

    let gender = match catalog.gender_ratio(request.species, form) {
        GenderRatio::Genderless => 2,
        GenderRatio::FemaleOnly => 1,
        GenderRatio::MaleOnly => 0,
        GenderRatio::Mixed if request.gender == GenderRequest::Male => 0,
        GenderRatio::Mixed => 1,
    };
    let gender_suffix = match gender {
        0 => " (M)",
        1 => " (F)",
        _ => "",
    };

    let form_suffix = form_name
        .as_deref()
        .filter(|name| !name.is_empty())
        .map(|name| format!("-{}", name.replace(" (", "-").replace(')', "")))
        .unwrap_or_default();

    let raid_only = matches!(request.species, species::WALKING_WAKE | species::IRON_LEAVES);
    let static_size = raid_only
        || matches!(
            request.species,
            species::KORAIDON
                | species::MIRAIDON
                | species::TING_LU
                | species::CHIEN_PAO
                | species::WO_CHIEN
                | species::CHI_YU
        );

    let random_id = (request.species == species::KORAIDON && partner.game != 50)
        || (request.species == species::MIRAIDON && partner.game != 51);
    let (tid, sid) = if random_id {
        let id32 = (u32::from(fastrand::u16(1..)) << 16) | u32::from(fastrand::u16(1..));
        (id32 % 1_000_000, id32 / 1_000_000)
    } else {
        (partner.tid7, partner.sid7)
    };

    let origins = catalog.encounter_origins(request.species, form);
    let mut native = origins.native;
    if origins.legacy_only {
        if !matches!(ball.as_str(), "Poke" | "Great" | "Ultra") {
            ball = ["Poke", "Great", "Ultra"][fastrand::usize(0..3)].to_string();
        }
        ball = format!("LA{ball}");
    }
    if request.species == species::VIVILLON && request.form == 19 {
        native = false;
    }

    let mut lines = vec![format!("{species_name}{form_suffix}{gender_suffix}")];
    lines.push(format!("Ability: {ability}"));
    if request.shiny {
        lines.push("Shiny: Yes".to_string());
    }
    lines.push(format!("Ball: {ball}"));
    lines.push(format!("Tera Type: {tera}"));
    lines.push(format!("{nature} Nature"));
    if let Some(ivs) = iv_request(label) {
        let parts: Vec<String> = ivs
            .iter()
            .zip(IV_TITLES)
            .filter_map(|(iv, title)| iv.map(|v| format!("{v} {title}")))
            .collect();
        if !parts.is_empty() {
            lines.push(format!("IVs: {}", parts.join(" / ")));
        }
    }
    if native {
        if let Some(language) = language_name(partner.language) {
            lines.push(format!("Language: {language}"));
        }
        lines.push(format!("OT: {}", partner.name));
        lines.push(format!("TID: {tid}"));
        lines.push(format!("SID: {sid}"));
        let ot_gender = if partner.gender == 0 { "Male" } else { "Female" };
        lines.push(format!("OTGender: {ot_gender}"));
        let version = match request.species {
            species::KORAIDON => 50,
            species::MIRAIDON => 51,
            _ => partner.game,
        };
        lines.push(format!(".Version={version}"));
        if !static_size {
            match request.size {
                SizeClass::Tiny => lines.push(".Scale=0".to_string()),
                SizeClass::Jumbo => lines.push(".Scale=255".to_string()),
                SizeClass::Random => {}
            }
        }
        lines.push("~=Generation=9".to_string());
        if !raid_only {
            lines.push("~!Location=30024".to_string());
        }
    }
    lines.push(".HyperTrainFlags=0".to_string());
    if request.low_level {
        lines.push(".CurrentLevel=$suggest".to_string());
    }

    let size = match request.size {
        SizeClass::Tiny => " Tiny",
        SizeClass::Jumbo => " Jumbo",
        SizeClass::Random => "",
    };
    let description = format!(
        "{}{species_name}{form_suffix} ({}){size} with {ability} and {nature} Nature{}, caught in {ball} Ball with Tera Type {tera}",
        if request.shiny { "Shiny " } else { "" },
        request.gender.symbol(),
        if request.low_level { " at lowest legal level" } else { "" },
    );

    Ok(GennedSpec {
        text: lines.join("\n"),
        description,
    })
}
