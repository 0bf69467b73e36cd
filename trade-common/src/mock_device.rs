//! Scripted in-memory device for tests and the simulator.
//!
//! [`MockConsole`] models just enough of the title's menus for a trade
//! session to run end to end: the overworld, the menu, the trade portal,
//! code entry, partner search and the trade box. Partners are scripted with
//! [`PartnerScript`]; each search consumes the next script. Time is read from
//! `tokio::time::Instant`, so tests can run under `tokio::time::pause()`.
//!
//! The module also carries [`StaticCatalog`] and [`StubOracle`], small
//! stand-ins for the catalog and legality collaborators.

use crate::catalog::{
    EncounterOrigins, GameCatalog, GenderRatio, NATURES, TeraType, species, version,
};
use crate::config::TitleSection;
use crate::device::{Button, DeviceFacade, PointerPath};
use crate::errors::{DeviceError, OracleError};
use crate::oracle::{BuiltPayload, LegalityReport, PayloadOracle};
use crate::payload::{Payload, SLOT_SIZE};
use crate::types::{PartnerInfo, STATUS_SIZE};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

// ── Memory map ──────────────────────────────────────────────────────────

const BOX_BASE: u64 = 0x1_0000;
const OVERWORLD: u64 = 0x2_0000;
const PORTAL: u64 = 0x2_0100;
const CONNECTED: u64 = 0x2_0200;
const PARTNER_NID: u64 = 0x2_0300;
const PARTNER_OFFERED: u64 = 0x2_1000;
const TRADER1: u64 = 0x2_2000;
const TRADER2: u64 = 0x2_2100;
const MY_STATUS: u64 = 0x2_2200;
const CURRENT_BOX: u64 = 0x2_2300;
const MEMORY_SIZE: usize = 0x3_0000;

fn address_of(name: &str) -> Option<u64> {
    Some(match name {
        "box_start" => BOX_BASE,
        "overworld" => OVERWORLD,
        "portal_box_status" => PORTAL,
        "is_connected" => CONNECTED,
        "partner_nid" => PARTNER_NID,
        "partner_offered" => PARTNER_OFFERED,
        "trader1_my_status" => TRADER1,
        "trader2_my_status" => TRADER2,
        "my_status" => MY_STATUS,
        "current_box" => CURRENT_BOX,
        _ => return None,
    })
}

/// Which screen the console is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Overworld,
    Menu,
    Portal,
    LinkTradeMenu,
    CodeEntry,
    SearchPrompt,
    Searching,
    Box,
    /// Stuck screen that ignores everything except the home button.
    Frozen,
    Home,
    CloseConfirm,
    Closed,
}

impl Screen {
    fn in_portal(self) -> bool {
        matches!(
            self,
            Self::Portal | Self::LinkTradeMenu | Self::CodeEntry | Self::SearchPrompt | Self::Searching
        )
    }
}

// ── Partner scripts ─────────────────────────────────────────────────────

/// One payload a scripted partner shows.
#[derive(Debug, Clone)]
pub struct ScriptedOffer {
    /// Delay after the previous reveal, trade or box entry.
    pub after: Duration,
    pub payload: Payload,
}

/// Behaviour of one trade partner.
#[derive(Debug, Clone)]
pub struct PartnerScript {
    pub info: PartnerInfo,
    pub arrive_after: Duration,
    pub offers: Vec<ScriptedOffer>,
    pub accepts: bool,
    pub leave_after: Option<Duration>,
    /// Partner occupies the first status slot instead of the second.
    pub listed_first: bool,
}

impl PartnerScript {
    pub fn new(info: PartnerInfo) -> Self {
        Self {
            info,
            arrive_after: Duration::from_secs(5),
            offers: Vec::new(),
            accepts: true,
            leave_after: None,
            listed_first: false,
        }
    }

    pub fn arrive_after(mut self, delay: Duration) -> Self {
        self.arrive_after = delay;
        self
    }

    pub fn offer(mut self, after: Duration, payload: Payload) -> Self {
        self.offers.push(ScriptedOffer { after, payload });
        self
    }

    /// Partner never confirms the exchange.
    pub fn refuses(mut self) -> Self {
        self.accepts = false;
        self
    }

    pub fn leaves_after(mut self, delay: Duration) -> Self {
        self.leave_after = Some(delay);
        self
    }

    pub fn listed_first(mut self) -> Self {
        self.listed_first = true;
        self
    }
}

#[derive(Debug)]
struct ActivePartner {
    script: PartnerScript,
    entered_at: Instant,
    anchor: Instant,
    next_offer: usize,
    shown: Option<usize>,
    traded: HashSet<usize>,
    a_presses: u32,
}

// ── Console ─────────────────────────────────────────────────────────────

#[derive(Debug)]
struct ConsoleState {
    memory: Vec<u8>,
    screen: Screen,
    resume: Screen,
    online: bool,
    can_connect: bool,
    pending_dismiss: u8,
    news_on_menu: bool,
    news_running: bool,
    keypad: (u8, u8),
    typed: String,
    entered_codes: Vec<String>,
    search_started: Option<Instant>,
    incoming: Option<PartnerScript>,
    partners: VecDeque<PartnerScript>,
    active: Option<ActivePartner>,
    box_prompt: bool,
    restarts: u32,
    trades: u32,
    disconnected: bool,
    disconnect_after: Option<u32>,
    reconnect_allowed: bool,
    reconnects: u32,
    presses: Vec<Button>,
}

/// Scripted in-memory device.
#[derive(Debug)]
pub struct MockConsole {
    title: TitleSection,
    state: Mutex<ConsoleState>,
}

impl MockConsole {
    /// Console parked on the overworld, offline, with `host` as the save owner.
    pub fn new(host: &PartnerInfo) -> Self {
        Self::with_title(host, TitleSection::default())
    }

    pub fn with_title(host: &PartnerInfo, title: TitleSection) -> Self {
        let mut memory = vec![0u8; MEMORY_SIZE];
        let status = host.to_status();
        let at = MY_STATUS as usize;
        memory[at..at + STATUS_SIZE].copy_from_slice(&status);

        Self {
            title,
            state: Mutex::new(ConsoleState {
                memory,
                screen: Screen::Overworld,
                resume: Screen::Overworld,
                online: false,
                can_connect: true,
                pending_dismiss: 0,
                news_on_menu: false,
                news_running: false,
                keypad: (0, 0),
                typed: String::new(),
                entered_codes: Vec::new(),
                search_started: None,
                incoming: None,
                partners: VecDeque::new(),
                active: None,
                box_prompt: false,
                restarts: 0,
                trades: 0,
                disconnected: false,
                disconnect_after: None,
                reconnect_allowed: true,
                reconnects: 0,
                presses: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConsoleState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Scripting ──

    /// Queue a partner for the next search.
    pub fn push_partner(&self, script: PartnerScript) {
        self.lock().partners.push_back(script);
    }

    /// Put the console on a screen that ignores every button but home.
    pub fn freeze(&self) {
        self.lock().screen = Screen::Frozen;
    }

    pub fn set_screen(&self, screen: Screen) {
        self.lock().screen = screen;
    }

    pub fn set_online(&self, online: bool) {
        self.lock().online = online;
    }

    /// Whether connecting online from the portal succeeds.
    pub fn set_can_connect(&self, can_connect: bool) {
        self.lock().can_connect = can_connect;
    }

    /// Show the news applet the next time the menu opens.
    pub fn show_news(&self) {
        self.lock().news_on_menu = true;
    }

    /// Drop the connection after `calls` more device calls.
    pub fn disconnect_after(&self, calls: u32) {
        self.lock().disconnect_after = Some(calls);
    }

    pub fn set_reconnect_allowed(&self, allowed: bool) {
        self.lock().reconnect_allowed = allowed;
    }

    pub fn set_box_slot(&self, slot: usize, payload: &Payload) {
        let bytes = payload.encode();
        let at = BOX_BASE as usize + slot * SLOT_SIZE;
        self.lock().memory[at..at + SLOT_SIZE].copy_from_slice(&bytes);
    }

    // ── Inspection ──

    pub fn screen(&self) -> Screen {
        self.lock().screen
    }

    pub fn is_online(&self) -> bool {
        self.lock().online
    }

    pub fn box_slot(&self, slot: usize) -> Payload {
        let at = BOX_BASE as usize + slot * SLOT_SIZE;
        Payload::decode(&self.lock().memory[at..at + SLOT_SIZE])
    }

    /// Codes confirmed on the keypad, oldest first.
    pub fn entered_codes(&self) -> Vec<String> {
        self.lock().entered_codes.clone()
    }

    pub fn restarts(&self) -> u32 {
        self.lock().restarts
    }

    pub fn trades_completed(&self) -> u32 {
        self.lock().trades
    }

    pub fn reconnects(&self) -> u32 {
        self.lock().reconnects
    }

    pub fn presses(&self) -> Vec<Button> {
        self.lock().presses.clone()
    }

    pub fn current_box(&self) -> u8 {
        self.lock().memory[CURRENT_BOX as usize]
    }

    pub fn partners_remaining(&self) -> usize {
        let state = self.lock();
        state.partners.len() + usize::from(state.incoming.is_some())
    }

    // ── Internals ──

    fn check_link(state: &mut ConsoleState) -> Result<(), DeviceError> {
        if state.disconnected {
            return Err(DeviceError::disconnected("mock link down"));
        }
        if let Some(left) = state.disconnect_after.as_mut() {
            if *left == 0 {
                state.disconnect_after = None;
                state.disconnected = true;
                return Err(DeviceError::disconnected("mock link dropped"));
            }
            *left -= 1;
        }
        Ok(())
    }

    fn advance(state: &mut ConsoleState, now: Instant) {
        if state.screen == Screen::Searching {
            let due = match (state.search_started, state.incoming.as_ref()) {
                (Some(started), Some(script)) => now >= started + script.arrive_after,
                _ => false,
            };
            if due && let Some(script) = state.incoming.take() {
                Self::partner_arrives(state, script, now);
            }
        }

        if state.screen != Screen::Box {
            return;
        }
        let Some(active) = state.active.as_mut() else {
            return;
        };

        if let Some(leave) = active.script.leave_after
            && now >= active.entered_at + leave
        {
            state.active = None;
            state.screen = Screen::Portal;
            state.box_prompt = false;
            return;
        }

        let current_traded = active.shown.is_some_and(|i| active.traded.contains(&i));
        let awaiting_trade = active.shown.is_some() && !current_traded;
        if let Some(offer) = active.script.offers.get(active.next_offer)
            && now >= active.anchor + offer.after
            && !(awaiting_trade && active.script.accepts && active.a_presses > 0)
        {
            let bytes = offer.payload.encode();
            let at = PARTNER_OFFERED as usize;
            state.memory[at..at + SLOT_SIZE].copy_from_slice(&bytes);
            active.shown = Some(active.next_offer);
            active.next_offer += 1;
            active.anchor = now;
            active.a_presses = 0;
        }
    }

    fn partner_arrives(state: &mut ConsoleState, script: PartnerScript, now: Instant) {
        let host = state.memory[MY_STATUS as usize..MY_STATUS as usize + STATUS_SIZE].to_vec();
        let partner = script.info.to_status();
        let (first, second) = if script.listed_first {
            (partner, host)
        } else {
            (host, partner)
        };
        state.memory[TRADER1 as usize..TRADER1 as usize + STATUS_SIZE].copy_from_slice(&first);
        state.memory[TRADER2 as usize..TRADER2 as usize + STATUS_SIZE].copy_from_slice(&second);
        state.memory[PARTNER_NID as usize..PARTNER_NID as usize + 8]
            .copy_from_slice(&script.info.nid.to_le_bytes());

        state.screen = Screen::Box;
        state.box_prompt = false;
        state.search_started = None;
        state.active = Some(ActivePartner {
            script,
            entered_at: now,
            anchor: now,
            next_offer: 0,
            shown: None,
            traded: HashSet::new(),
            a_presses: 0,
        });
    }

    fn sync_flags(state: &mut ConsoleState) {
        state.memory[OVERWORLD as usize] = if state.screen == Screen::Overworld {
            0x11
        } else {
            0
        };
        state.memory[PORTAL as usize] = match state.screen {
            Screen::Box => 0x14,
            s if s.in_portal() => 0x10,
            _ => 0,
        };
        state.memory[CONNECTED as usize] = u8::from(state.online);
    }

    fn press(state: &mut ConsoleState, button: Button, now: Instant) {
        state.presses.push(button);
        if button == Button::Home && !matches!(state.screen, Screen::Home | Screen::CloseConfirm) {
            state.resume = state.screen;
            state.screen = Screen::Home;
            return;
        }

        match (state.screen, button) {
            (Screen::Overworld, Button::X) => {
                state.screen = Screen::Menu;
                if state.news_on_menu {
                    state.news_on_menu = false;
                    state.news_running = true;
                }
            }
            (Screen::Menu, Button::B) if state.news_running => state.news_running = false,
            (Screen::Menu, Button::B) => state.screen = Screen::Overworld,
            (Screen::Menu, Button::A) => state.screen = Screen::Portal,

            (Screen::Portal, Button::A) if state.pending_dismiss > 0 => state.pending_dismiss -= 1,
            (Screen::Portal, Button::L) if !state.online => {
                if state.can_connect {
                    state.online = true;
                }
                state.pending_dismiss = 2;
            }
            (Screen::Portal, Button::A) => state.screen = Screen::LinkTradeMenu,
            (Screen::Portal, Button::B) => state.screen = Screen::Menu,

            (Screen::LinkTradeMenu, Button::Plus) => {
                state.screen = Screen::CodeEntry;
                state.keypad = (0, 0);
                state.typed.clear();
            }
            (Screen::LinkTradeMenu, Button::A) => state.screen = Screen::SearchPrompt,
            (Screen::LinkTradeMenu, Button::B) => state.screen = Screen::Portal,

            (Screen::CodeEntry, Button::DUp) => state.keypad.0 = state.keypad.0.saturating_sub(1),
            (Screen::CodeEntry, Button::DDown) => state.keypad.0 = (state.keypad.0 + 1).min(3),
            (Screen::CodeEntry, Button::DLeft) => state.keypad.1 = state.keypad.1.saturating_sub(1),
            (Screen::CodeEntry, Button::DRight) => state.keypad.1 = (state.keypad.1 + 1).min(2),
            (Screen::CodeEntry, Button::A) => {
                let (row, col) = state.keypad;
                let digit = if row == 3 { 0 } else { row * 3 + col + 1 };
                state.typed.push(char::from(b'0' + digit));
            }
            (Screen::CodeEntry, Button::Plus) => {
                let code = std::mem::take(&mut state.typed);
                state.entered_codes.push(code);
                state.screen = Screen::LinkTradeMenu;
            }
            (Screen::CodeEntry, Button::B) => state.screen = Screen::LinkTradeMenu,

            (Screen::SearchPrompt, Button::A) => {
                state.screen = Screen::Searching;
                state.search_started = Some(now);
                if state.incoming.is_none() {
                    state.incoming = state.partners.pop_front();
                }
            }
            (Screen::SearchPrompt, Button::B) => state.screen = Screen::LinkTradeMenu,
            (Screen::Searching, Button::B) => {
                state.screen = Screen::LinkTradeMenu;
                state.search_started = None;
            }

            (Screen::Box, Button::B) => state.box_prompt = true,
            (Screen::Box, Button::A) if state.box_prompt => {
                state.box_prompt = false;
                state.active = None;
                state.screen = Screen::Portal;
            }
            (Screen::Box, Button::A) => Self::confirm_press(state, now),

            (Screen::Home, Button::X) => state.screen = Screen::CloseConfirm,
            (Screen::Home, Button::A) => state.screen = state.resume,
            (Screen::CloseConfirm, Button::A) => state.screen = Screen::Closed,
            (Screen::CloseConfirm, Button::B) => state.screen = Screen::Home,
            (Screen::Closed, Button::A) => {
                state.screen = Screen::Overworld;
                state.online = false;
                state.active = None;
                state.incoming = None;
                state.news_running = false;
                state.pending_dismiss = 0;
                state.restarts += 1;
            }
            _ => {}
        }
    }

    fn confirm_press(state: &mut ConsoleState, now: Instant) {
        let Some(active) = state.active.as_mut() else {
            return;
        };
        active.a_presses += 1;
        let Some(shown) = active.shown else {
            return;
        };
        if !active.script.accepts || active.traded.contains(&shown) || active.a_presses < 2 {
            return;
        }

        let offer = active.script.offers[shown].payload.encode();
        active.traded.insert(shown);
        active.anchor = now;
        active.a_presses = 0;
        let at = BOX_BASE as usize;
        state.memory[at..at + SLOT_SIZE].copy_from_slice(&offer);
        state.trades += 1;
    }

    fn region(len: usize, offset: u64) -> Result<std::ops::Range<usize>, DeviceError> {
        let start = usize::try_from(offset)
            .map_err(|_| DeviceError::protocol(format!("offset {offset:#x} out of range")))?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= MEMORY_SIZE)
            .ok_or_else(|| DeviceError::protocol(format!("read past end at {offset:#x}")))?;
        Ok(start..end)
    }
}

#[async_trait]
impl DeviceFacade for MockConsole {
    async fn read_bytes(&self, offset: u64, len: usize) -> Result<Vec<u8>, DeviceError> {
        let mut state = self.lock();
        Self::check_link(&mut state)?;
        Self::advance(&mut state, Instant::now());
        Self::sync_flags(&mut state);
        let range = Self::region(len, offset)?;
        Ok(state.memory[range].to_vec())
    }

    async fn write_bytes(&self, offset: u64, bytes: &[u8]) -> Result<(), DeviceError> {
        let mut state = self.lock();
        Self::check_link(&mut state)?;
        let range = Self::region(bytes.len(), offset)?;
        let touches_box = range.start < BOX_BASE as usize + SLOT_SIZE && range.end > BOX_BASE as usize;
        state.memory[range].copy_from_slice(bytes);
        if touches_box && let Some(active) = state.active.as_mut() {
            active.a_presses = 0;
        }
        Ok(())
    }

    async fn resolve_pointer_chain(&self, path: &PointerPath) -> Result<u64, DeviceError> {
        let mut state = self.lock();
        Self::check_link(&mut state)?;
        self.title
            .pointers
            .iter()
            .find(|(_, p)| *p == path)
            .and_then(|(name, _)| address_of(name))
            .ok_or_else(|| DeviceError::PointerUnresolved(path.to_string()))
    }

    async fn press_button(&self, button: Button, _hold_ms: u64) -> Result<(), DeviceError> {
        let mut state = self.lock();
        Self::check_link(&mut state)?;
        let now = Instant::now();
        Self::advance(&mut state, now);
        Self::press(&mut state, button, now);
        Ok(())
    }

    async fn is_process_running(&self, id: u64) -> Result<bool, DeviceError> {
        let mut state = self.lock();
        Self::check_link(&mut state)?;
        if id == self.title.news_applet_id {
            Ok(state.news_running)
        } else if id == self.title.game_title_id {
            Ok(state.screen != Screen::Closed)
        } else {
            Ok(false)
        }
    }

    async fn reset_connection(&self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if !state.reconnect_allowed {
            return Err(DeviceError::disconnected("mock reconnect refused"));
        }
        state.disconnected = false;
        state.reconnects += 1;
        Ok(())
    }
}

// ── Stub collaborators ──────────────────────────────────────────────────

/// Small fixed catalog covering the species and items used in tests.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    species: HashMap<u16, &'static str>,
    items: HashMap<u16, &'static str>,
    forms: HashMap<(u16, u8), &'static str>,
    genderless: HashSet<u16>,
    legacy_only: HashSet<u16>,
    unholdable: HashSet<u16>,
}

impl Default for StaticCatalog {
    fn default() -> Self {
        let species = HashMap::from([
            (species::PIKACHU, "Pikachu"),
            (133, "Eevee"),
            (280, "Ralts"),
            (species::VIVILLON, "Vivillon"),
            (899, "Wyrdeer"),
            (906, "Sprigatito"),
            (937, "Ceruledge"),
            (species::WO_CHIEN, "Wo-Chien"),
            (species::KORAIDON, "Koraidon"),
            (species::MIRAIDON, "Miraidon"),
            (species::WALKING_WAKE, "Walking Wake"),
            (1000, "Gholdengo"),
        ]);
        let mut items = HashMap::from([
            (1, "Master Ball"),
            (2, "Ultra Ball"),
            (3, "Great Ball"),
            (4, "Poké Ball"),
            (5, "Safari Ball"),
            (12, "Premier Ball"),
            (13, "Dusk Ball"),
            (16, "Cherish Ball"),
            (50, "Rare Candy"),
            (228, "Smoke Ball"),
            (234, "Leftovers"),
            (236, "Light Ball"),
            (278, "Iron Ball"),
            (645, "Ability Capsule"),
            (1606, "Ability Patch"),
            (1128, "Exp. Share"),
        ]);
        for tera in TeraType::ALL {
            items.insert(1862 + u16::from(tera.id()), tera_shard_name(*tera));
        }
        Self {
            species,
            items,
            forms: HashMap::from([((species::VIVILLON, 19), "Poké Ball")]),
            genderless: HashSet::from([1000, species::KORAIDON, species::MIRAIDON]),
            legacy_only: HashSet::from([899]),
            unholdable: HashSet::from([1128]),
        }
    }
}

fn tera_shard_name(tera: TeraType) -> &'static str {
    match tera {
        TeraType::Normal => "Normal Tera Shard",
        TeraType::Fighting => "Fighting Tera Shard",
        TeraType::Flying => "Flying Tera Shard",
        TeraType::Poison => "Poison Tera Shard",
        TeraType::Ground => "Ground Tera Shard",
        TeraType::Rock => "Rock Tera Shard",
        TeraType::Bug => "Bug Tera Shard",
        TeraType::Ghost => "Ghost Tera Shard",
        TeraType::Steel => "Steel Tera Shard",
        TeraType::Fire => "Fire Tera Shard",
        TeraType::Water => "Water Tera Shard",
        TeraType::Grass => "Grass Tera Shard",
        TeraType::Electric => "Electric Tera Shard",
        TeraType::Psychic => "Psychic Tera Shard",
        TeraType::Ice => "Ice Tera Shard",
        TeraType::Dragon => "Dragon Tera Shard",
        TeraType::Dark => "Dark Tera Shard",
        TeraType::Fairy => "Fairy Tera Shard",
    }
}

impl StaticCatalog {
    /// Reverse species lookup by display name.
    pub fn species_by_name(&self, name: &str) -> Option<u16> {
        self.species
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(id, _)| *id)
    }
}

impl GameCatalog for StaticCatalog {
    fn species_count(&self) -> u16 {
        1026
    }

    fn species_name(&self, species: u16) -> Option<String> {
        self.species.get(&species).map(|s| (*s).to_string())
    }

    fn item_name(&self, item: u16) -> Option<String> {
        self.items.get(&item).map(|s| (*s).to_string())
    }

    fn is_held_item_allowed(&self, item: u16) -> bool {
        item != 0 && self.items.contains_key(&item) && !self.unholdable.contains(&item)
    }

    fn form_name(&self, species: u16, form: u8) -> Option<String> {
        self.forms.get(&(species, form)).map(|s| (*s).to_string())
    }

    fn ability_name(&self, _species: u16, _form: u8, index: u8) -> Option<String> {
        Some(
            match index {
                0 => "Static",
                1 => "Pressure",
                _ => "Lightning Rod",
            }
            .to_string(),
        )
    }

    fn gender_ratio(&self, species: u16, _form: u8) -> GenderRatio {
        if self.genderless.contains(&species) {
            GenderRatio::Genderless
        } else {
            GenderRatio::Mixed
        }
    }

    fn encounter_origins(&self, species: u16, _form: u8) -> EncounterOrigins {
        EncounterOrigins {
            native: !self.legacy_only.contains(&species),
            legacy_only: self.legacy_only.contains(&species),
        }
    }
}

/// Oracle that accepts any checksummed payload outside a deny list and
/// builds payloads from the first line of a specification.
#[derive(Debug, Default)]
pub struct StubOracle {
    catalog: StaticCatalog,
    illegal_species: Mutex<HashSet<u16>>,
    built: Mutex<Vec<String>>,
}

impl StubOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every payload of `species` as illegal.
    pub fn deny_species(&self, species: u16) {
        self.illegal_species
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(species);
    }

    /// Specification texts received so far.
    pub fn built_specs(&self) -> Vec<String> {
        self.built.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn is_denied(&self, species: u16) -> bool {
        self.illegal_species
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&species)
    }
}

#[async_trait]
impl PayloadOracle for StubOracle {
    fn check(&self, payload: &Payload) -> LegalityReport {
        if payload.is_empty() {
            LegalityReport::invalid("Empty slot.")
        } else if !payload.checksum_valid() {
            LegalityReport::invalid("Invalid checksum.")
        } else if self.is_denied(payload.species) {
            LegalityReport::invalid(format!("Species {} is not obtainable.", payload.species))
        } else {
            LegalityReport::valid()
        }
    }

    async fn build_from_spec(
        &self,
        text: &str,
        partner: &PartnerInfo,
    ) -> Result<BuiltPayload, OracleError> {
        self.built
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(text.to_string());

        let first = text.lines().next().unwrap_or_default();
        let name = first.split(" (").next().unwrap_or_default().trim();
        let base = name.split('-').next().unwrap_or_default();
        let species = self
            .catalog
            .species_by_name(name)
            .or_else(|| self.catalog.species_by_name(base))
            .ok_or_else(|| OracleError::Unbuildable {
                species: name.to_string(),
                reason: "unknown species".to_string(),
            })?;
        if self.is_denied(species) {
            return Err(OracleError::Unbuildable {
                species: name.to_string(),
                reason: "no legal encounter".to_string(),
            });
        }

        let hash = blake3::hash(text.as_bytes());
        let seed = hash.as_bytes();
        let mut pk = Payload {
            encryption_constant: u32::from_le_bytes([seed[0], seed[1], seed[2], seed[3]]) | 1,
            pid: u32::from_le_bytes([seed[4], seed[5], seed[6], seed[7]]),
            species,
            level: 50,
            language: partner.language,
            ot_name: partner.name.clone(),
            ot_gender: partner.gender,
            version: if version::is_supported(partner.game) {
                partner.game
            } else {
                version::SCARLET
            },
            ivs: [31; 6],
            ..Payload::default()
        };
        pk.set_display_ids(partner.tid7, partner.sid7);

        for line in text.lines() {
            if let Some(ball) = line.strip_prefix("Ball: ") {
                let ball = ball.trim().trim_end_matches(" Ball");
                if let Ok(ball) = ball.parse::<crate::catalog::Ball>() {
                    pk.ball = ball.id();
                }
            } else if let Some(tera) = line.strip_prefix("Tera Type: ") {
                if let Ok(tera) = tera.trim().parse::<TeraType>() {
                    pk.tera_type_override = tera.id();
                }
            } else if let Some(nature) = line.strip_suffix(" Nature") {
                if let Some(idx) = NATURES.iter().position(|n| *n == nature.trim()) {
                    pk.nature = idx as u8;
                }
            } else if line.trim() == "Shiny: Yes" {
                let xor = (pk.pid & 0xFFFF) as u16 ^ pk.tid16 ^ pk.sid16;
                pk.pid = (u32::from(xor) << 16) | (pk.pid & 0xFFFF);
            }
        }
        pk.refresh_checksum();

        Ok(BuiltPayload {
            payload: pk,
            diagnostics: Vec::new(),
        })
    }
}
