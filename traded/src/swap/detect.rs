//! Reading swap instructions out of shown payloads.

use crate::swap::ev::{RESET_LABEL, is_designator_label, is_hex_label};
use crate::swap::genned::is_genned_label;
use crate::swap::{InstructionSource, SwapInstruction, SwapInstructionSet, SwapKind};
use trade_common::config::CloneSection;
use trade_common::{Ball, GameCatalog, Payload, TeraType};

/// Whether `item` is an enabled trigger equal to `trigger`.
fn is_trigger(item: u16, trigger: u16) -> bool {
    trigger != 0 && item == trigger
}

fn is_ev_label(label: &str) -> bool {
    label == RESET_LABEL || is_designator_label(label) || is_hex_label(label)
}

/// Ball or tera instruction named by a single word.
///
/// Numeric words never match; tera types win over balls.
pub fn ball_or_tera(word: &str, source: InstructionSource) -> Option<SwapInstruction> {
    let word = word.replace("Poké", "Poke");
    if word.parse::<i64>().is_ok() {
        return None;
    }
    if let Ok(tera) = word.parse::<TeraType>() {
        return Some(SwapInstruction::new(SwapKind::TeraSwap, source, tera.name()));
    }
    word.parse::<Ball>()
        .ok()
        .map(|ball| SwapInstruction::new(SwapKind::BallSwap, source, ball.name()))
}

/// Ball or tera instruction implied by a held item's display name,
/// e.g. `"Dusk Ball"` or `"Fire Tera Shard"`.
fn from_item_name(name: &str, source: InstructionSource) -> Option<SwapInstruction> {
    let mut words = name.split(' ');
    let first = words.next()?;
    match words.next()? {
        "Ball" => Some(SwapInstruction::new(
            SwapKind::BallSwap,
            source,
            first.replace("Poké", "Poke"),
        )),
        "Tera" => Some(SwapInstruction::new(SwapKind::TeraSwap, source, first)),
        _ => None,
    }
}

fn held_item_instruction(
    offer: &Payload,
    catalog: &dyn GameCatalog,
    source: InstructionSource,
) -> Option<SwapInstruction> {
    if offer.held_item == 0 {
        return None;
    }
    catalog
        .item_name(offer.held_item)
        .and_then(|name| from_item_name(&name, source))
}

/// Instructions carried by the payload the requester wants cloned.
pub fn detect_offer(
    offer: &Payload,
    triggers: &CloneSection,
    catalog: &dyn GameCatalog,
) -> SwapInstructionSet {
    use InstructionSource::{Auto, Clone};

    let mut set = SwapInstructionSet::new();
    let item = offer.held_item;
    let label = offer.nickname.as_str();
    let genned_trigger = is_trigger(item, triggers.genned_swap_item);

    if is_trigger(item, triggers.item_swap_item) {
        set.update(SwapInstruction::new(SwapKind::ItemRequest, Clone, label));
    } else if is_trigger(item, triggers.ot_swap_item) {
        set.update(SwapInstruction::bare(SwapKind::OtSwap, Clone));
    } else if is_trigger(item, triggers.nick_swap_item) {
        set.update(SwapInstruction::bare(SwapKind::NicknameClear, Clone));
    } else if is_trigger(item, triggers.distro_swap_item) {
        set.update(SwapInstruction::bare(SwapKind::DistroRequest, Clone));
    } else if genned_trigger {
        if is_genned_label(label) {
            set.update(SwapInstruction::new(SwapKind::GennedRequest, Clone, label));
        }
    } else if let Some(instruction) = held_item_instruction(offer, catalog, Clone) {
        set.update(instruction);
    }

    if !offer.is_nicknamed {
        return set;
    }
    // A genned label may look like an EV label; it is never read as one.
    if is_ev_label(label) && !genned_trigger {
        set.update(SwapInstruction::new(SwapKind::EvSpread, Clone, label));
        set.update(SwapInstruction::bare(SwapKind::NicknameClear, Auto));
    }
    if let Some(instruction) = ball_or_tera(label, Clone) {
        set.update(instruction);
        set.update(SwapInstruction::bare(SwapKind::NicknameClear, Auto));
    }
    set
}

/// Merge instructions carried by the throw-away payload into `set`.
///
/// Only the item and OT triggers apply here. A hex EV label completes a
/// spread already requested on the first payload: the first half comes
/// from the clone label, the second half from this one.
pub fn detect_trash(
    trash: &Payload,
    triggers: &CloneSection,
    catalog: &dyn GameCatalog,
    set: &mut SwapInstructionSet,
) {
    use InstructionSource::{Combo, Trash};

    let item = trash.held_item;
    let label = trash.nickname.as_str();

    if is_trigger(item, triggers.item_swap_item) {
        set.update(SwapInstruction::new(SwapKind::ItemRequest, Trash, label));
    } else if is_trigger(item, triggers.ot_swap_item) {
        set.update(SwapInstruction::bare(SwapKind::OtSwap, Trash));
    } else if let Some(instruction) = held_item_instruction(trash, catalog, Trash) {
        set.update(instruction);
    }

    if !trash.is_nicknamed {
        return;
    }
    if label == RESET_LABEL || is_designator_label(label) {
        set.update(SwapInstruction::new(SwapKind::EvSpread, Trash, label));
    } else if is_hex_label(label) {
        let instruction = match set.get(SwapKind::EvSpread) {
            Some(existing) => {
                let head: String = existing.parameter.chars().take(6).collect();
                let tail: String = label.chars().skip(6).collect();
                SwapInstruction::new(SwapKind::EvSpread, Combo, head + &tail)
            }
            None => SwapInstruction::new(SwapKind::EvSpread, Trash, label),
        };
        set.update(instruction);
    }
    if let Some(instruction) = ball_or_tera(label, Trash) {
        set.update(instruction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trade_common::mock_device::StaticCatalog;

    const OT_TRIGGER: u16 = 50;
    const GENNED_TRIGGER: u16 = 645;
    const ITEM_TRIGGER: u16 = 1606;
    const DISTRO_TRIGGER: u16 = 234;

    fn triggers() -> CloneSection {
        CloneSection {
            item_swap_item: ITEM_TRIGGER,
            ot_swap_item: OT_TRIGGER,
            genned_swap_item: GENNED_TRIGGER,
            distro_swap_item: DISTRO_TRIGGER,
            ..CloneSection::default()
        }
    }

    fn offer(item: u16, nickname: &str) -> Payload {
        Payload {
            species: 280,
            held_item: item,
            nickname: nickname.to_string(),
            is_nicknamed: true,
            version: 51,
            ..Payload::default()
        }
    }

    fn kinds(set: &SwapInstructionSet) -> Vec<SwapKind> {
        set.kinds().collect()
    }

    #[test]
    fn ot_trigger_is_detected() {
        let set = detect_offer(&offer(OT_TRIGGER, "Ralts"), &triggers(), &StaticCatalog::default());
        assert_eq!(kinds(&set), vec![SwapKind::OtSwap]);
    }

    #[test]
    fn zero_trigger_never_fires() {
        let set = detect_offer(&offer(0, "Ralts"), &CloneSection::default(), &StaticCatalog::default());
        assert!(set.is_empty());
    }

    #[test]
    fn held_ball_implies_ball_swap() {
        let set = detect_offer(&offer(4, "Ralts"), &triggers(), &StaticCatalog::default());
        let ball = set.get(SwapKind::BallSwap).unwrap();
        assert_eq!(ball.parameter, "Poke");
        assert_eq!(ball.source, InstructionSource::Clone);
    }

    #[test]
    fn held_tera_shard_implies_tera_swap() {
        let set = detect_offer(&offer(1862 + 9, "Ralts"), &triggers(), &StaticCatalog::default());
        assert_eq!(set.get(SwapKind::TeraSwap).unwrap().parameter, "Fire");
    }

    #[test]
    fn ev_label_adds_auto_nickname_clear() {
        let set = detect_offer(&offer(0, "MM0S00"), &triggers(), &StaticCatalog::default());
        assert_eq!(kinds(&set), vec![SwapKind::EvSpread, SwapKind::NicknameClear]);
        assert_eq!(
            set.get(SwapKind::NicknameClear).unwrap().source,
            InstructionSource::Auto
        );
    }

    #[test]
    fn ball_label_combines_with_ot_trigger() {
        let set = detect_offer(&offer(OT_TRIGGER, "Dusk"), &triggers(), &StaticCatalog::default());
        assert_eq!(
            kinds(&set),
            vec![SwapKind::OtSwap, SwapKind::BallSwap, SwapKind::NicknameClear]
        );
    }

    #[test]
    fn genned_trigger_requires_label_shape() {
        let catalog = StaticCatalog::default();
        let set = detect_offer(&offer(GENNED_TRIGGER, "4Aw0Ab"), &triggers(), &catalog);
        assert_eq!(kinds(&set), vec![SwapKind::GennedRequest]);

        let set = detect_offer(&offer(GENNED_TRIGGER, "Ralts!"), &triggers(), &catalog);
        assert!(set.is_empty());
    }

    #[test]
    fn genned_label_also_names_tera_type() {
        let set = detect_offer(&offer(GENNED_TRIGGER, "Poison"), &triggers(), &StaticCatalog::default());
        assert_eq!(
            kinds(&set),
            vec![SwapKind::GennedRequest, SwapKind::TeraSwap, SwapKind::NicknameClear]
        );
        assert_eq!(set.get(SwapKind::TeraSwap).unwrap().parameter, "Poison");
        assert_eq!(
            set.get(SwapKind::NicknameClear).unwrap().source,
            InstructionSource::Auto
        );
    }

    #[test]
    fn genned_label_is_not_read_as_ev_spread() {
        let set = detect_offer(&offer(GENNED_TRIGGER, "MM0S00"), &triggers(), &StaticCatalog::default());
        assert_eq!(kinds(&set), vec![SwapKind::GennedRequest]);
    }

    #[test]
    fn numeric_label_is_neither_ball_nor_tera() {
        assert!(ball_or_tera("236", InstructionSource::Clone).is_none());
        assert!(ball_or_tera("Any", InstructionSource::Clone).is_none());
        let ball = ball_or_tera("Poké", InstructionSource::Clone).unwrap();
        assert_eq!(ball.parameter, "Poke");
    }

    #[test]
    fn trash_hex_label_completes_clone_spread() {
        let catalog = StaticCatalog::default();
        let mut set = detect_offer(&offer(0, "FC0000000000"), &triggers(), &catalog);
        detect_trash(&offer(0, "000000FC0004"), &triggers(), &catalog, &mut set);

        let ev = set.get(SwapKind::EvSpread).unwrap();
        assert_eq!(ev.parameter, "FC0000FC0004");
        assert_eq!(ev.source, InstructionSource::Combo);
    }

    #[test]
    fn trash_only_honours_item_and_ot_triggers() {
        let catalog = StaticCatalog::default();
        let mut set = SwapInstructionSet::new();
        detect_trash(&offer(DISTRO_TRIGGER, "Ralts"), &triggers(), &catalog, &mut set);
        assert!(set.is_empty());

        detect_trash(&offer(OT_TRIGGER, "Great"), &triggers(), &catalog, &mut set);
        assert_eq!(kinds(&set), vec![SwapKind::OtSwap, SwapKind::BallSwap]);
        assert!(!set.contains(SwapKind::NicknameClear));
    }

    #[test]
    fn unnicknamed_species_name_is_not_a_label() {
        let mut shown = offer(0, "Ralts");
        shown.is_nicknamed = false;
        shown.nickname = "Master".to_string();
        let set = detect_offer(&shown, &triggers(), &StaticCatalog::default());
        assert!(set.is_empty());
    }
}
