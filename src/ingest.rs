//! Message ingestion (spec §4.2): recognizes and parses the literal
//! multi-line heartbeat format and the free-form GodPack-discovery format
//! the reroll bots post, classifies test-result phrasing, and persists
//! everything idempotently by message id.

use aho_corasick::AhoCorasickBuilder;
use chrono::NaiveDateTime;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::{
    events::{EmissionBus, Event, EventKind, SeverityLevel},
    models::{NewGodPack, NewHeartbeat, NewTestResult, TestKind},
    storage::Storage,
    Error,
};

/// Phrase variants a bot may use to report a MISS (the friend slot was
/// full) — the distillation's spec named only `MISS`; these are the
/// variants `miss_sentences.py` in the source bot actually emits.
const MISS_PHRASES: &[&str] = &[
    "pack is full",
    "no open slots",
    "friend list full",
    "slots full",
    "miss",
];

/// Phrase variants reporting a NOSHOW (the account could not be reached at
/// all, so nothing was learned about slot occupancy).
const NOSHOW_PHRASES: &[&str] = &["no response", "timed out", "noshow", "no show", "unreachable"];

/// Keyword variants that mark a message body as a candidate GodPack
/// discovery report (spec §4.2), matched case-insensitively.
const GP_DISCOVERY_KEYWORDS: &[&str] = &[
    "god pack found",
    "godpack found",
    "gp found",
    "rare pack found",
    "special pack found",
];

fn mention_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^<@(?P<id>\d+)>$").expect("static pattern is valid"))
}

fn online_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^online:\s*(?P<tokens>.+)$").expect("static pattern is valid"))
}

fn offline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^offline:\s*(?P<tokens>.+)$").expect("static pattern is valid"))
}

fn time_packs_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)time:\s*(?P<minutes>\d+)m\s*packs:\s*(?P<packs>\d+)")
            .expect("static pattern is valid")
    })
}

fn select_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^select:\s*(?P<tags>.+)$").expect("static pattern is valid"))
}

fn account_paren_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?P<name>[A-Za-z0-9_'-]+(?:\s[A-Za-z0-9_'-]+)*)\s*\((?P<code>\d{9,})\)")
            .expect("static pattern is valid")
    })
}

fn account_trailing_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?P<name>[A-Za-z0-9_'-]+)\s+(?P<code>\d{9,})\b").expect("static pattern is valid")
    })
}

fn slot_count_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:(\d+)\s*packs\b|\[(\d+)\s*p\]|\bpack:\s*(\d+)|\b(\d+)p\b)")
            .expect("static pattern is valid")
    })
}

fn ratio_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:\[(\d+)/5\]|\((\d+)/5\)|\bratio:\s*(\d+)|\b(\d+)/5\b)")
            .expect("static pattern is valid")
    })
}

/// Worker identity as it appears on a heartbeat's first line: a bare
/// numeric id, a `<@id>` mention, or a name to be resolved against the
/// worker registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerRef {
    Id(i64),
    Name(String),
}

fn parse_worker_ref(identity: &str) -> WorkerRef {
    if let Some(c) = mention_re().captures(identity) {
        if let Ok(id) = c["id"].parse() {
            return WorkerRef::Id(id);
        }
    }
    if let Ok(id) = identity.parse::<i64>() {
        return WorkerRef::Id(id);
    }
    WorkerRef::Name(identity.to_string())
}

fn split_tokens(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone)]
pub struct HeartbeatMessage {
    pub worker_ref: WorkerRef,
    pub instances_online: i32,
    pub instances_offline: i32,
    pub time_running_minutes: i32,
    pub packs_cumulative: i64,
    pub main_active: bool,
    pub selected_packs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GpDiscoveryMessage {
    pub account_name: String,
    pub friend_code: String,
    pub pack_slot_count: i16,
    /// `-1` when no ratio pattern was present in the body (spec §3's
    /// "unknown" sentinel).
    pub ratio: i16,
}

/// Recognizes and parses a heartbeat off the wire format of spec §4.2/§6:
/// a worker-identity line followed, in order, by `Online:`, `Offline:`, and
/// a `Time: Nm Packs: N` line, with an optional trailing `Select:` line.
///
/// `instances_online`/`instances_offline` are the *count* of
/// comma-separated tokens after each marker, not parsed integers — each
/// token is either numeric or the literal `main`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `raw` does not contain the required
/// lines in order.
pub fn parse_heartbeat(raw: &str) -> Result<HeartbeatMessage, Error> {
    let mut lines = raw.lines().map(str::trim).filter(|l| !l.is_empty());

    let identity = lines
        .next()
        .ok_or_else(|| Error::InvalidInput("empty heartbeat message".into()))?;
    let worker_ref = parse_worker_ref(identity);

    let mut online_tokens: Option<Vec<String>> = None;
    let mut offline_tokens: Option<Vec<String>> = None;
    let mut minutes: Option<i32> = None;
    let mut packs: Option<i64> = None;
    let mut selected_packs: Vec<String> = Vec::new();

    for line in lines {
        if online_tokens.is_none() {
            if let Some(c) = online_re().captures(line) {
                online_tokens = Some(split_tokens(&c["tokens"]));
                continue;
            }
        }
        if online_tokens.is_some() && offline_tokens.is_none() {
            if let Some(c) = offline_re().captures(line) {
                offline_tokens = Some(split_tokens(&c["tokens"]));
                continue;
            }
        }
        if offline_tokens.is_some() && minutes.is_none() {
            if let Some(c) = time_packs_re().captures(line) {
                minutes = c["minutes"].parse().ok();
                packs = c["packs"].parse().ok();
                continue;
            }
        }
        if let Some(c) = select_re().captures(line) {
            selected_packs = split_tokens(&c["tags"]);
        }
    }

    let online_tokens =
        online_tokens.ok_or_else(|| Error::InvalidInput("missing Online: line".into()))?;
    let offline_tokens =
        offline_tokens.ok_or_else(|| Error::InvalidInput("missing Offline: line".into()))?;
    let time_running_minutes =
        minutes.ok_or_else(|| Error::InvalidInput("missing Time:/Packs: line".into()))?;
    let packs_cumulative =
        packs.ok_or_else(|| Error::InvalidInput("missing Time:/Packs: line".into()))?;

    let main_active = online_tokens.iter().any(|t| t.eq_ignore_ascii_case("main"));

    Ok(HeartbeatMessage {
        worker_ref,
        instances_online: i32::try_from(online_tokens.len()).unwrap_or(i32::MAX),
        instances_offline: i32::try_from(offline_tokens.len()).unwrap_or(i32::MAX),
        time_running_minutes,
        packs_cumulative,
        main_active,
        selected_packs,
    })
}

fn extract_account_and_code(body: &str) -> Option<(String, String)> {
    if let Some(c) = account_paren_re().captures(body) {
        return Some((c["name"].trim().to_string(), c["code"].to_string()));
    }
    account_trailing_re()
        .captures(body)
        .map(|c| (c["name"].to_string(), c["code"].to_string()))
}

fn extract_slot_count(body: &str) -> i16 {
    let raw = slot_count_re()
        .captures(body)
        .and_then(|c| (1..=4).find_map(|i| c.get(i)))
        .and_then(|m| m.as_str().parse::<i16>().ok())
        .unwrap_or(1);
    raw.clamp(1, 5)
}

fn extract_ratio(body: &str) -> i16 {
    match ratio_re()
        .captures(body)
        .and_then(|c| (1..=4).find_map(|i| c.get(i)))
        .and_then(|m| m.as_str().parse::<i16>().ok())
    {
        Some(raw) => raw.clamp(0, 5),
        None => -1,
    }
}

/// Recognizes a message body as a GodPack discovery (spec §4.2): it must
/// carry one of [`GP_DISCOVERY_KEYWORDS`] case-insensitively and at least
/// one image attachment.
#[must_use]
pub fn is_gp_discovery(body: &str, image_attachments: usize) -> bool {
    if image_attachments < 1 {
        return false;
    }
    static AC: OnceLock<aho_corasick::AhoCorasick> = OnceLock::new();
    AC.get_or_init(|| {
        AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(GP_DISCOVERY_KEYWORDS)
            .expect("static pattern set is valid")
    })
    .is_match(body)
}

/// Parses a recognized GodPack-discovery body, extracting account name,
/// friend code, pack-slot count, and ratio per the patterns of spec §4.2.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `body`/`image_attachments` don't
/// satisfy [`is_gp_discovery`], or no account/friend-code pair can be
/// extracted.
pub fn parse_gp_discovery(body: &str, image_attachments: usize) -> Result<GpDiscoveryMessage, Error> {
    if !is_gp_discovery(body, image_attachments) {
        return Err(Error::InvalidInput(
            "message is not a recognized godpack discovery".into(),
        ));
    }
    let (account_name, friend_code) = extract_account_and_code(body)
        .ok_or_else(|| Error::InvalidInput("could not extract account name/friend code".into()))?;

    Ok(GpDiscoveryMessage {
        account_name,
        friend_code,
        pack_slot_count: extract_slot_count(body),
        ratio: extract_ratio(body),
    })
}

/// Classifies a free-text test report into MISS or NOSHOW by matching
/// against the known phrase variants, case-insensitively.
#[must_use]
pub fn classify_test_phrase(raw: &str) -> Option<TestKind> {
    static MISS_AC: OnceLock<aho_corasick::AhoCorasick> = OnceLock::new();
    static NOSHOW_AC: OnceLock<aho_corasick::AhoCorasick> = OnceLock::new();

    let miss = MISS_AC.get_or_init(|| {
        AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(MISS_PHRASES)
            .expect("static pattern set is valid")
    });
    if miss.is_match(raw) {
        return Some(TestKind::Miss);
    }
    let noshow = NOSHOW_AC.get_or_init(|| {
        AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(NOSHOW_PHRASES)
            .expect("static pattern set is valid")
    });
    if noshow.is_match(raw) {
        return Some(TestKind::Noshow);
    }
    None
}

/// The next daily reset (spec §3): `discovery_ts`'s own calendar day at
/// `daily_reset_local_hour`, plus 3 days if discovery fell before that
/// reset or 4 days if it fell at or after it.
#[must_use]
pub fn next_daily_reset_expiry(discovery_ts: NaiveDateTime, daily_reset_local_hour: u32) -> NaiveDateTime {
    let today_reset = discovery_ts
        .date()
        .and_hms_opt(daily_reset_local_hour, 0, 0)
        .expect("daily_reset_local_hour is a valid hour-of-day");
    let offset_days = if discovery_ts < today_reset { 3 } else { 4 };
    today_reset + chrono::Duration::days(offset_days)
}

/// The entry point workers and bot relays call to submit observations.
#[derive(Clone)]
pub struct Ingest {
    storage: Storage,
    bus: EmissionBus,
}

impl Ingest {
    #[must_use]
    pub fn new(storage: Storage, bus: EmissionBus) -> Self {
        Self { storage, bus }
    }

    fn resolve_worker_ref(&self, worker_ref: &WorkerRef) -> Result<Option<i64>, Error> {
        match worker_ref {
            WorkerRef::Id(id) => Ok(Some(*id)),
            WorkerRef::Name(name) => Ok(self
                .storage
                .find_worker_by_display_name(name)?
                .map(|w| w.worker_id)),
        }
    }

    /// Parses and persists a heartbeat, along with the derived worker
    /// totals. Returns `false` without side effects if the message is
    /// malformed, the worker name doesn't resolve, or `message_id` was
    /// already recorded — all three are treated as a no-op per spec §7's
    /// parse-error/unknown-worker policy, not a caller-visible failure.
    ///
    /// # Errors
    ///
    /// Returns an error if an underlying storage write fails.
    pub fn accept_heartbeat(
        &self,
        message_id: &str,
        ts: NaiveDateTime,
        raw: &str,
    ) -> Result<bool, Error> {
        let parsed = match parse_heartbeat(raw) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "dropping malformed heartbeat message");
                return Ok(false);
            }
        };

        let Some(worker_id) = self.resolve_worker_ref(&parsed.worker_ref)? else {
            info!(identity = ?parsed.worker_ref, "dropping heartbeat: worker name did not resolve");
            return Ok(false);
        };

        let selected_packs = parsed.selected_packs.join(",");
        let inserted = self.storage.insert_heartbeat(&NewHeartbeat {
            message_id,
            worker_id,
            ts,
            instances_online: parsed.instances_online,
            instances_offline: parsed.instances_offline,
            time_running_minutes: parsed.time_running_minutes,
            packs_cumulative: parsed.packs_cumulative,
            main_active: parsed.main_active,
            selected_packs: &selected_packs,
        })?;
        if !inserted {
            return Ok(false);
        }

        self.storage
            .apply_heartbeat_to_worker(worker_id, ts, parsed.packs_cumulative)?;

        self.bus.publish(Event {
            kind: EventKind::HeartbeatAccepted,
            severity: SeverityLevel::Info,
            payload: serde_json::json!({
                "worker_id": worker_id,
                "message_id": message_id,
            }),
            actor_worker_id: Some(worker_id),
        })?;
        Ok(true)
    }

    /// Parses and persists a GodPack discovery, crediting the discovering
    /// worker if known, and computing `expires_at` per spec §3's
    /// daily-reset rule. Returns `None` without side effects if the body
    /// doesn't satisfy [`is_gp_discovery`] (wrong keyword, or no
    /// attachment) — a spec §7 parse error, not a caller-visible failure.
    ///
    /// # Errors
    ///
    /// Returns an error if an underlying storage write fails.
    #[allow(clippy::too_many_arguments)]
    pub fn accept_gp_discovery(
        &self,
        message_id: &str,
        ts: NaiveDateTime,
        raw: &str,
        image_attachments: usize,
        screenshot_url: Option<&str>,
        discovered_by: Option<i64>,
        daily_reset_local_hour: u32,
    ) -> Result<Option<i32>, Error> {
        let parsed = match parse_gp_discovery(raw, image_attachments) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "dropping message not recognized as a godpack discovery");
                return Ok(None);
            }
        };

        let expires_at = next_daily_reset_expiry(ts, daily_reset_local_hour);
        let ratio_raw = if parsed.ratio >= 0 { Some(parsed.ratio) } else { None };

        let gp_id = self.storage.insert_godpack(&NewGodPack {
            discovery_message_id: message_id,
            discovery_ts: ts,
            pack_slot_count: parsed.pack_slot_count,
            account_name: &parsed.account_name,
            friend_code: &parsed.friend_code,
            screenshot_url,
            state: "TESTING",
            ratio_raw,
            expires_at,
            discovered_by,
        })?;

        if let Some(worker_id) = discovered_by {
            self.storage.credit_gp_discovery(worker_id)?;
        }

        self.bus.publish(Event {
            kind: EventKind::GodPackAdded,
            severity: SeverityLevel::Info,
            payload: serde_json::json!({ "gp_id": gp_id, "account_name": parsed.account_name }),
            actor_worker_id: discovered_by,
        })?;
        if let Some(ratio) = ratio_raw {
            self.bus.publish(Event {
                kind: EventKind::GodPackRatioChanged,
                severity: SeverityLevel::Info,
                payload: serde_json::json!({ "gp_id": gp_id, "ratio": ratio }),
                actor_worker_id: discovered_by,
            })?;
        }
        Ok(Some(gp_id))
    }

    /// Records a test result against a GodPack.
    ///
    /// # Errors
    ///
    /// Returns an error if any underlying write fails.
    pub fn accept_test_result(
        &self,
        worker_id: i64,
        gp_id: i32,
        ts: NaiveDateTime,
        kind: TestKind,
        open_slots: Option<i32>,
        friend_count: Option<i32>,
    ) -> Result<i32, Error> {
        let id = self.storage.insert_test_result(&NewTestResult {
            worker_id,
            gp_id,
            ts,
            kind: &kind.to_string(),
            open_slots,
            friend_count,
        })?;

        self.bus.publish(Event {
            kind: EventKind::TestResultAdded,
            severity: SeverityLevel::Info,
            payload: serde_json::json!({ "gp_id": gp_id, "kind": kind.to_string() }),
            actor_worker_id: Some(worker_id),
        })?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parses_scenario_one_heartbeat() {
        let raw = "42\nOnline: 1,2,main\nOffline: 3\nTime: 17m Packs: 4250";
        let msg = parse_heartbeat(raw).unwrap();
        assert_eq!(msg.worker_ref, WorkerRef::Id(42));
        assert_eq!(msg.instances_online, 3);
        assert_eq!(msg.instances_offline, 1);
        assert_eq!(msg.time_running_minutes, 17);
        assert_eq!(msg.packs_cumulative, 4250);
        assert!(msg.main_active);
    }

    #[test]
    fn parses_heartbeat_with_mention_and_select_line() {
        let raw = "<@99>\nOnline: 1,2\nOffline: main\nTime: 5m Packs: 10\nSelect: fire,water";
        let msg = parse_heartbeat(raw).unwrap();
        assert_eq!(msg.worker_ref, WorkerRef::Id(99));
        assert!(!msg.main_active);
        assert_eq!(msg.selected_packs, vec!["fire".to_string(), "water".to_string()]);
    }

    #[test]
    fn heartbeat_with_name_identity_is_unresolved_here() {
        let raw = "alice\nOnline: 1\nOffline: 1\nTime: 1m Packs: 1";
        let msg = parse_heartbeat(raw).unwrap();
        assert_eq!(msg.worker_ref, WorkerRef::Name("alice".to_string()));
    }

    #[test]
    fn rejects_message_missing_required_lines() {
        assert!(parse_heartbeat("42\nOnline: 1").is_err());
    }

    #[test]
    fn parses_scenario_three_gp_discovery() {
        let raw = "God pack found\nAce (123456789) [3P] [2/5]";
        let msg = parse_gp_discovery(raw, 1).unwrap();
        assert_eq!(msg.account_name, "Ace");
        assert_eq!(msg.friend_code, "123456789");
        assert_eq!(msg.pack_slot_count, 3);
        assert_eq!(msg.ratio, 2);
    }

    #[test]
    fn gp_discovery_requires_an_attachment() {
        let raw = "God pack found\nAce (123456789) [3P] [2/5]";
        assert!(parse_gp_discovery(raw, 0).is_err());
    }

    #[test]
    fn gp_discovery_requires_a_keyword() {
        let raw = "Ace (123456789) [3P] [2/5]";
        assert!(parse_gp_discovery(raw, 1).is_err());
    }

    #[test]
    fn gp_discovery_without_ratio_pattern_is_unknown() {
        let raw = "gp found\nAce (123456789) 4 packs";
        let msg = parse_gp_discovery(raw, 1).unwrap();
        assert_eq!(msg.pack_slot_count, 4);
        assert_eq!(msg.ratio, -1);
    }

    #[test]
    fn classifies_miss_and_noshow_variants() {
        assert_eq!(classify_test_phrase("Sorry, the pack is full!"), Some(TestKind::Miss));
        assert_eq!(classify_test_phrase("Request timed out"), Some(TestKind::Noshow));
        assert_eq!(classify_test_phrase("Friend added successfully"), None);
    }

    #[test]
    fn daily_reset_expiry_matches_worked_example() {
        let discovery = chrono::NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let expires_at = next_daily_reset_expiry(discovery, 6);
        let expected = chrono::NaiveDate::from_ymd_opt(2025, 1, 5)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap();
        assert_eq!(expires_at, expected);
    }

    #[test]
    fn daily_reset_expiry_before_reset_adds_three_days() {
        let discovery = chrono::NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(3, 0, 0)
            .unwrap();
        let expires_at = next_daily_reset_expiry(discovery, 6);
        let expected = chrono::NaiveDate::from_ymd_opt(2025, 1, 4)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap();
        assert_eq!(expires_at, expected);
    }

    fn storage() -> Storage {
        let dir = tempfile::tempdir().unwrap().keep();
        Storage::open(&dir, 5, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn accept_heartbeat_creates_worker_and_is_idempotent() {
        let storage = storage();
        let bus = EmissionBus::new(storage.clone(), 16);
        let ingest = Ingest::new(storage.clone(), bus);
        let ts = chrono::Utc::now().naive_utc();
        let raw = "42\nOnline: 1,2,main\nOffline: 3\nTime: 17m Packs: 4250";

        assert!(ingest.accept_heartbeat("hb-100", ts, raw).unwrap());
        let worker = storage.get_worker(42).unwrap().unwrap();
        assert_eq!(worker.total_packs, 4250);

        assert!(!ingest.accept_heartbeat("hb-100", ts, raw).unwrap());
        let rows = storage.recent_heartbeats(42, ts - chrono::Duration::days(1)).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn accept_heartbeat_resolves_worker_by_name() {
        let storage = storage();
        storage.ensure_worker(7).unwrap();
        storage
            .set_display_name(7, "alice")
            .unwrap();
        let bus = EmissionBus::new(storage.clone(), 16);
        let ingest = Ingest::new(storage.clone(), bus);
        let ts = chrono::Utc::now().naive_utc();
        let raw = "alice\nOnline: 1\nOffline: 1\nTime: 1m Packs: 5";

        assert!(ingest.accept_heartbeat("hb-200", ts, raw).unwrap());
        assert_eq!(storage.get_worker(7).unwrap().unwrap().total_packs, 5);
    }

    #[test]
    fn accept_heartbeat_drops_unresolved_name() {
        let storage = storage();
        let bus = EmissionBus::new(storage.clone(), 16);
        let ingest = Ingest::new(storage.clone(), bus);
        let raw = "nobody\nOnline: 1\nOffline: 1\nTime: 1m Packs: 5";
        assert!(!ingest.accept_heartbeat("hb-300", chrono::Utc::now().naive_utc(), raw).unwrap());
    }

    #[test]
    fn accept_gp_discovery_computes_daily_reset_expiry() {
        let storage = storage();
        let bus = EmissionBus::new(storage.clone(), 16);
        let ingest = Ingest::new(storage.clone(), bus);
        let ts = chrono::NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let raw = "God pack found\nAce (123456789) [3P] [2/5]";

        let gp_id = ingest
            .accept_gp_discovery("gp-1", ts, raw, 1, None, None, 6)
            .unwrap()
            .unwrap();
        let gp = storage.get_godpack(gp_id).unwrap().unwrap();
        assert_eq!(gp.pack_slot_count, 3);
        assert_eq!(gp.ratio(), Some(2));
        let expected_expiry = chrono::NaiveDate::from_ymd_opt(2025, 1, 5)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap();
        assert_eq!(gp.expires_at, expected_expiry);
    }
}
