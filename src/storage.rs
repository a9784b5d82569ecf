//! Ban and Audit Storage
//!
//! External store consumed by the messaging core: ban records checked at
//! connection time and written by moderation actions, plus an audit trail of
//! moderator actions. Supports both in-memory (for testing) and SQLite
//! (for production).

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection};

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// One ban on an ip address.
#[derive(Debug, Clone)]
pub struct BanRecord {
    /// Public ban id, safe to show to moderators.
    pub id: String,
    /// Identity the ban was issued against.
    pub username: String,
    /// Hashed machine id, when known.
    pub hashed_mac: String,
    /// Banned address.
    pub ip: IpAddr,
    /// When the ban lapses (Unix timestamp in seconds).
    pub expires_at_secs: u64,
    /// When the ban was recorded (Unix timestamp in seconds).
    pub created_at_secs: u64,
}

impl BanRecord {
    /// Creates a ban starting now and lasting the given number of minutes.
    pub fn new(username: &str, hashed_mac: &str, ip: IpAddr, duration_minutes: u64) -> Self {
        let now = now_secs();
        BanRecord {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            hashed_mac: hashed_mac.to_string(),
            ip,
            expires_at_secs: now + duration_minutes * 60,
            created_at_secs: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        now_secs() >= self.expires_at_secs
    }

    /// Whole minutes until the ban lapses, rounded up. Zero once expired.
    pub fn remaining_minutes(&self) -> u64 {
        let remaining = self.expires_at_secs.saturating_sub(now_secs());
        remaining.div_ceil(60)
    }
}

/// One audited moderator action.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub moderator: String,
    pub action: String,
    pub target: String,
    pub created_at_secs: u64,
}

impl AuditEntry {
    pub fn new(moderator: &str, action: &str, target: &str) -> Self {
        AuditEntry {
            moderator: moderator.to_string(),
            action: action.to_string(),
            target: target.to_string(),
            created_at_secs: now_secs(),
        }
    }
}

/// Trait for ban/audit storage backends.
pub trait ModerationStore: Send + Sync {
    /// The active (unexpired) ban for an address, if any.
    fn ban_for(&self, ip: IpAddr) -> Option<BanRecord>;

    /// Records a ban. A write failure is surfaced to the caller; in-memory
    /// session closes are never rolled back on account of it.
    fn record_ban(&self, ban: BanRecord) -> Result<(), String>;

    /// Records one moderator action.
    fn record_audit(&self, entry: AuditEntry) -> Result<(), String>;

    /// Returns the number of ban records, expired ones included.
    fn ban_count(&self) -> usize;

    /// Returns the number of audit entries.
    fn audit_count(&self) -> usize;

    /// Whether the address has an active ban.
    fn is_banned(&self, ip: IpAddr) -> bool {
        self.ban_for(ip).is_some()
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

/// Creates a moderation store for the given backend. `data_dir` is only used
/// by the SQLite backend.
pub fn create_moderation_store(
    backend: StorageBackend,
    data_dir: Option<&Path>,
) -> Box<dyn ModerationStore> {
    match backend {
        StorageBackend::Memory => Box::new(MemoryModerationStore::new()),
        StorageBackend::Sqlite => {
            let path = data_dir
                .map(|d| d.join("moderation.db"))
                .unwrap_or_else(|| "moderation.db".into());
            Box::new(
                SqliteModerationStore::open(&path).expect("Failed to open moderation database"),
            )
        }
    }
}

// ============================================================================
// In-Memory Storage (for testing and development)
// ============================================================================

/// In-memory ban/audit store.
pub struct MemoryModerationStore {
    bans: RwLock<HashMap<IpAddr, BanRecord>>,
    audits: RwLock<Vec<AuditEntry>>,
}

impl MemoryModerationStore {
    pub fn new() -> Self {
        MemoryModerationStore {
            bans: RwLock::new(HashMap::new()),
            audits: RwLock::new(Vec::new()),
        }
    }

    /// Latest audit entries, newest last. Test/monitoring helper.
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        let audits = self.audits.read().unwrap();
        audits.clone()
    }
}

impl Default for MemoryModerationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ModerationStore for MemoryModerationStore {
    fn ban_for(&self, ip: IpAddr) -> Option<BanRecord> {
        let bans = self.bans.read().unwrap();
        bans.get(&ip).filter(|b| !b.is_expired()).cloned()
    }

    fn record_ban(&self, ban: BanRecord) -> Result<(), String> {
        let mut bans = self.bans.write().unwrap();
        bans.insert(ban.ip, ban);
        Ok(())
    }

    fn record_audit(&self, entry: AuditEntry) -> Result<(), String> {
        let mut audits = self.audits.write().unwrap();
        audits.push(entry);
        Ok(())
    }

    fn ban_count(&self) -> usize {
        let bans = self.bans.read().unwrap();
        bans.len()
    }

    fn audit_count(&self) -> usize {
        let audits = self.audits.read().unwrap();
        audits.len()
    }
}

// ============================================================================
// SQLite Storage (for production)
// ============================================================================

/// SQLite-backed persistent ban/audit store.
pub struct SqliteModerationStore {
    conn: Mutex<Connection>,
}

impl SqliteModerationStore {
    /// Opens or creates a SQLite database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS bans (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                hashed_mac TEXT NOT NULL,
                ip TEXT NOT NULL,
                expires_at_secs INTEGER NOT NULL,
                created_at_secs INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_bans_ip ON bans(ip, expires_at_secs)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS audit_log (
                moderator TEXT NOT NULL,
                action TEXT NOT NULL,
                target TEXT NOT NULL,
                created_at_secs INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(SqliteModerationStore {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory SQLite database (for testing).
    #[cfg(test)]
    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::open(":memory:")
    }
}

impl ModerationStore for SqliteModerationStore {
    fn ban_for(&self, ip: IpAddr) -> Option<BanRecord> {
        let conn = self.conn.lock().unwrap();
        let now = now_secs() as i64;

        conn.query_row(
            "SELECT id, username, hashed_mac, ip, expires_at_secs, created_at_secs
             FROM bans
             WHERE ip = ?1 AND expires_at_secs > ?2
             ORDER BY expires_at_secs DESC
             LIMIT 1",
            params![ip.to_string(), now],
            |row| {
                let ip_text: String = row.get(3)?;
                Ok(BanRecord {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    hashed_mac: row.get(2)?,
                    ip: ip_text.parse().unwrap_or(ip),
                    expires_at_secs: row.get::<_, i64>(4)? as u64,
                    created_at_secs: row.get::<_, i64>(5)? as u64,
                })
            },
        )
        .ok()
    }

    fn record_ban(&self, ban: BanRecord) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO bans (id, username, hashed_mac, ip, expires_at_secs, created_at_secs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                ban.id,
                ban.username,
                ban.hashed_mac,
                ban.ip.to_string(),
                ban.expires_at_secs as i64,
                ban.created_at_secs as i64
            ],
        )
        .map(|_| ())
        .map_err(|e| e.to_string())
    }

    fn record_audit(&self, entry: AuditEntry) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO audit_log (moderator, action, target, created_at_secs)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.moderator,
                entry.action,
                entry.target,
                entry.created_at_secs as i64
            ],
        )
        .map(|_| ())
        .map_err(|e| e.to_string())
    }

    fn ban_count(&self) -> usize {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM bans", [], |row| row.get::<_, i64>(0))
            .unwrap_or(0) as usize
    }

    fn audit_count(&self) -> usize {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| {
            row.get::<_, i64>(0)
        })
        .unwrap_or(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn check_store(store: &dyn ModerationStore) {
        assert!(!store.is_banned(ip("9.9.9.9")));

        let ban = BanRecord::new("Bob", "hashed-mac", ip("9.9.9.9"), 120);
        let ban_id = ban.id.clone();
        store.record_ban(ban).unwrap();

        assert!(store.is_banned(ip("9.9.9.9")));
        assert!(!store.is_banned(ip("9.9.9.8")));

        let found = store.ban_for(ip("9.9.9.9")).unwrap();
        assert_eq!(found.id, ban_id);
        assert_eq!(found.username, "Bob");
        assert_eq!(store.ban_count(), 1);

        store
            .record_audit(AuditEntry::new("mod", "disconnect", "Bob"))
            .unwrap();
        assert_eq!(store.audit_count(), 1);
    }

    #[test]
    fn test_memory_store() {
        check_store(&MemoryModerationStore::new());
    }

    #[test]
    fn test_sqlite_store() {
        check_store(&SqliteModerationStore::in_memory().unwrap());
    }

    #[test]
    fn test_expired_ban_is_not_active() {
        let store = MemoryModerationStore::new();
        let mut ban = BanRecord::new("Bob", "", ip("9.9.9.9"), 60);
        ban.expires_at_secs = now_secs() - 1;
        store.record_ban(ban).unwrap();

        assert!(!store.is_banned(ip("9.9.9.9")));
        assert!(store.ban_for(ip("9.9.9.9")).is_none());
        // The record itself still exists.
        assert_eq!(store.ban_count(), 1);
    }

    #[test]
    fn test_expired_sqlite_ban_is_not_active() {
        let store = SqliteModerationStore::in_memory().unwrap();
        let mut ban = BanRecord::new("Bob", "", ip("9.9.9.9"), 60);
        ban.expires_at_secs = now_secs() - 1;
        store.record_ban(ban).unwrap();

        assert!(!store.is_banned(ip("9.9.9.9")));
        assert_eq!(store.ban_count(), 1);
    }

    #[test]
    fn test_remaining_minutes_rounds_up() {
        let ban = BanRecord::new("Bob", "", ip("9.9.9.9"), 120);
        assert!(ban.remaining_minutes() >= 119 && ban.remaining_minutes() <= 120);

        let mut expired = BanRecord::new("Bob", "", ip("9.9.9.9"), 1);
        expired.expires_at_secs = now_secs() - 10;
        assert_eq!(expired.remaining_minutes(), 0);
    }
}
