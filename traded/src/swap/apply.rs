//! Validating and applying swap instructions.

use crate::archive::PayloadArchive;
use crate::counters::TradeCounters;
use crate::library::TemplateTable;
use crate::swap::genned::{GennedRequest, build_spec};
use crate::swap::{SwapInstruction, SwapInstructionSet, SwapKind, SwapRejection, decode_ev_spread};
use tracing::{debug, info};
use trade_common::catalog::{location, species, version};
use trade_common::{Ball, GameCatalog, PartnerInfo, Payload, PayloadOracle, TeraType};

/// Friendship given to the handling trainer of a genned payload.
const HANDLER_FRIENDSHIP: u8 = 50;

/// Everything an instruction may consult while being applied.
pub struct SwapContext<'a> {
    pub catalog: &'a dyn GameCatalog,
    pub oracle: &'a dyn PayloadOracle,
    /// The trade partner the result is built for.
    pub partner: &'a PartnerInfo,
    /// The console's own trainer, recorded as handler of genned payloads.
    pub host: &'a PartnerInfo,
    pub templates: &'a TemplateTable,
    pub counters: &'a TradeCounters,
    pub archive: &'a PayloadArchive,
}

/// Apply `set` to `offer`.
///
/// A genned request replaces the payload first, the remaining instructions
/// run in detection order, and a distribution request replaces the result
/// last. The first rejection aborts the whole set.
pub async fn apply_set(
    set: &SwapInstructionSet,
    offer: &Payload,
    ctx: &SwapContext<'_>,
) -> Result<Payload, SwapRejection> {
    let mut payload = match set.get(SwapKind::GennedRequest) {
        Some(genned) => apply_genned(&genned.parameter, ctx).await?,
        None => offer.clone(),
    };

    for instruction in set
        .iter()
        .filter(|i| !matches!(i.kind, SwapKind::GennedRequest | SwapKind::DistroRequest))
    {
        apply_one(instruction, &mut payload, ctx)?;
        debug!(%instruction, "Applied swap instruction");
    }

    if set.contains(SwapKind::DistroRequest) {
        payload = ctx
            .templates
            .find(&payload)
            .cloned()
            .ok_or(SwapRejection::NoTemplate)?;
    }
    Ok(payload)
}

fn apply_one(
    instruction: &SwapInstruction,
    payload: &mut Payload,
    ctx: &SwapContext<'_>,
) -> Result<(), SwapRejection> {
    let parameter = instruction.parameter.as_str();
    match instruction.kind {
        SwapKind::ItemRequest => apply_item(parameter, payload, ctx.catalog),
        SwapKind::OtSwap => apply_ot(payload, ctx),
        SwapKind::NicknameClear => clear_nickname(payload, ctx.catalog),
        SwapKind::BallSwap => apply_ball(parameter, payload),
        SwapKind::TeraSwap => apply_tera(parameter, payload),
        SwapKind::EvSpread => apply_ev(parameter, payload),
        SwapKind::GennedRequest | SwapKind::DistroRequest => Ok(()),
    }
}

fn apply_item(
    label: &str,
    payload: &mut Payload,
    catalog: &dyn GameCatalog,
) -> Result<(), SwapRejection> {
    if payload.is_egg {
        return Err(SwapRejection::Egg(SwapKind::ItemRequest));
    }
    let unknown = || SwapRejection::UnknownParameter {
        kind: SwapKind::ItemRequest,
        value: label.to_string(),
    };
    // Labels are one-based item numbers.
    let requested = label.trim().parse::<i16>().map_err(|_| unknown())?;
    let item = requested
        .checked_sub(1)
        .and_then(|item| u16::try_from(item).ok())
        .ok_or_else(unknown)?;
    if !catalog.is_held_item_allowed(item) {
        return Err(SwapRejection::ItemNotHoldable(item));
    }
    payload.held_item = item;
    Ok(())
}

/// Reset the nickname to the species name.
pub fn clear_nickname(payload: &mut Payload, catalog: &dyn GameCatalog) -> Result<(), SwapRejection> {
    if payload.met_location == location::IN_GAME_TRADE
        || payload.fateful_encounter
        || payload.is_egg
    {
        return Err(SwapRejection::NicknameLocked);
    }
    payload.nickname = catalog.species_name(payload.species).unwrap_or_default();
    payload.is_nicknamed = false;
    Ok(())
}

fn apply_tera(name: &str, payload: &mut Payload) -> Result<(), SwapRejection> {
    if payload.is_egg {
        return Err(SwapRejection::Egg(SwapKind::TeraSwap));
    }
    let tera = name
        .parse::<TeraType>()
        .map_err(|_| SwapRejection::UnknownParameter {
            kind: SwapKind::TeraSwap,
            value: name.to_string(),
        })?;
    payload.tera_type_override = tera.id();
    Ok(())
}

fn apply_ev(label: &str, payload: &mut Payload) -> Result<(), SwapRejection> {
    if payload.is_egg {
        return Err(SwapRejection::Egg(SwapKind::EvSpread));
    }
    payload.evs = decode_ev_spread(label, payload.evs).map_err(|reason| SwapRejection::EvSpread {
        label: label.to_string(),
        reason,
    })?;
    Ok(())
}

fn apply_ball(name: &str, payload: &mut Payload) -> Result<(), SwapRejection> {
    if !version::is_supported(payload.version) {
        return Err(SwapRejection::UnsupportedVersion(payload.version));
    }
    // Held items named like balls that are not containers.
    if matches!(name, "Smoke" | "Iron" | "Light") {
        return Ok(());
    }
    let name = name.replace("Poké", "Poke");
    let refuse = || SwapRejection::BallNotAllowed(name.clone());
    let ball = name
        .parse::<Ball>()
        .map_err(|_| SwapRejection::UnknownParameter {
            kind: SwapKind::BallSwap,
            value: name.clone(),
        })?;

    if species::STARTERS.contains(&payload.species)
        || ball == Ball::Cherish
        || payload.fateful_encounter
        || payload.met_location == location::IN_GAME_TRADE
        || (location::SALVATORE.contains(&payload.met_location) && payload.met_level == 5)
    {
        return Err(refuse());
    }
    if matches!(ball, Ball::None | Ball::Sport | Ball::Safari) || ball.is_legacy() {
        return Err(refuse());
    }
    if ball == Ball::Master && payload.was_egg() {
        return Err(refuse());
    }
    payload.ball = ball.id();
    Ok(())
}

// ── Trainer swap ────────────────────────────────────────────────────────

/// Rewrite the PID so the payload is shiny under its current trainer ids.
///
/// `square` selects an XOR of zero. Raid payloads keep the low half of
/// their PID and use an XOR of exactly one when not square; everything
/// else gets a fresh low half and an XOR in 1..16.
fn force_shiny(payload: &mut Payload, square: bool, raid: bool) {
    let (low, xor) = if raid {
        ((payload.pid & 0xFFFF) as u16, if square { 0 } else { 1 })
    } else {
        (fastrand::u16(..), if square { 0 } else { fastrand::u16(1..16) })
    };
    let high = payload.tid16 ^ payload.sid16 ^ low ^ xor;
    payload.pid = (u32::from(high) << 16) | u32::from(low);
}

fn apply_ot(payload: &mut Payload, ctx: &SwapContext<'_>) -> Result<(), SwapRejection> {
    if !version::is_supported(payload.version) {
        return Err(SwapRejection::UnsupportedVersion(payload.version));
    }
    let partner = ctx.partner;
    let was_shiny = payload.is_shiny();
    let square = payload.shiny_xor() == 0;

    // Box legends stay tied to their own version.
    let version_locked = (payload.species == species::KORAIDON
        && partner.game == version::VIOLET)
        || (payload.species == species::MIRAIDON && partner.game == version::SCARLET);
    if version_locked {
        payload.tid16 = fastrand::u16(1..);
        payload.sid16 = fastrand::u16(1..);
    } else {
        payload.set_display_ids(partner.tid7, partner.sid7);
        payload.version = partner.game;
    }
    payload.ot_name = partner.name.clone();
    payload.language = partner.language;
    payload.ot_gender = partner.gender;

    if was_shiny {
        force_shiny(payload, square, payload.met_location == location::TERA_RAID);
    }
    if payload.egg_location == location::LINK_TRADE_EGG && payload.was_egg() {
        payload.egg_location = location::LINK_TRADE_EGG_RECEIVED;
    }

    payload.refresh_checksum();
    let report = ctx.oracle.check(payload);
    if !report.valid {
        return Err(SwapRejection::Illegal(report.report));
    }
    Ok(())
}

// ── Genned ──────────────────────────────────────────────────────────────

async fn apply_genned(label: &str, ctx: &SwapContext<'_>) -> Result<Payload, SwapRejection> {
    let request = GennedRequest::from_label(label)
        .ok_or_else(|| SwapRejection::Genned(format!("malformed label '{label}'")))?;
    let spec = build_spec(&request, label, ctx.catalog, ctx.partner)?;

    let set_number = ctx.counters.next_genned_set();
    ctx.archive.save_spec(set_number, &spec.text);
    info!(set = set_number, "Genned request: {}", spec.description);

    let species_name = ctx
        .catalog
        .species_name(request.species)
        .unwrap_or_else(|| request.species.to_string());
    let built = ctx
        .oracle
        .build_from_spec(&spec.text, ctx.partner)
        .await
        .map_err(|e| SwapRejection::Genned(e.user_message(&species_name)))?;

    let mut payload = built.payload;
    let report = ctx.oracle.check(&payload);
    if !report.valid {
        return Err(SwapRejection::Illegal(report.report));
    }

    if payload.was_egg() {
        payload.met_location = location::HATCHED_DEFAULT;
    }
    payload.mark_value = 0;
    payload.ht_name = ctx.host.name.clone();
    payload.ht_language = ctx.host.language;
    payload.ht_gender = ctx.host.gender;
    payload.ht_friendship = HANDLER_FRIENDSHIP;
    payload.refresh_checksum();
    Ok(payload)
}
