//! SQLite-backed member directory with encrypted identity columns.
//!
//! Every identity attribute is stored as independently encrypted ciphertext;
//! only the row id and registration date stay plaintext. All SQL is
//! parameterized and the store hands plaintext models outward, ciphertext
//! never leaks past this module.
//!
//! Because the ciphertext is randomized, no equality or LIKE predicate can
//! run in SQL. [`MemberStore::find_by_decrypted_predicate`] is the explicit
//! linear decrypt-and-scan that replaces indexed lookup; callers must not
//! assume anything faster. Linear cost is acceptable at admin-tool record
//! counts.

use crate::cipher::FieldCipher;
use crate::error::{Error, Result};
use chrono::Local;
use parking_lot::Mutex;
use rand::Rng;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;

/// A member with all fields decrypted.
#[derive(Debug, Clone, Serialize)]
pub struct MemberProfile {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub age: u32,
    pub gender: String,
    pub weight: f64,
    pub address: String,
    pub email: String,
    pub phone: String,
    pub registration_date: String,
    pub membership_id: String,
}

/// Input for [`MemberStore::insert`]; the store assigns id, registration
/// date and membership id.
#[derive(Debug, Clone)]
pub struct NewMember {
    pub first_name: String,
    pub last_name: String,
    pub age: u32,
    pub gender: String,
    pub weight: f64,
    pub address: String,
    pub email: String,
    pub phone: String,
}

/// Partial update; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct MemberUpdate {
    pub address: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub weight: Option<f64>,
}

pub struct MemberStore {
    conn: Mutex<Connection>,
    cipher: FieldCipher,
}

const SELECT_COLUMNS: &str = "id, first_name, last_name, age, gender, weight, \
                              address, email, phone, registration_date, membership_id";

impl MemberStore {
    pub fn open(path: &Path, cipher: FieldCipher) -> Result<Self> {
        Self::init(Connection::open(path)?, cipher)
    }

    /// In-memory store for tests.
    pub fn open_in_memory(cipher: FieldCipher) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, cipher)
    }

    fn init(conn: Connection, cipher: FieldCipher) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS members (
                id INTEGER PRIMARY KEY,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                age TEXT NOT NULL,
                gender TEXT NOT NULL,
                weight TEXT NOT NULL,
                address TEXT NOT NULL,
                email TEXT NOT NULL,
                phone TEXT NOT NULL,
                registration_date TEXT NOT NULL,
                membership_id TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    /// Encrypts every identity field and inserts one row.
    pub fn insert(&self, member: &NewMember) -> Result<MemberProfile> {
        let membership_id = generate_membership_id();
        let registration_date = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO members (first_name, last_name, age, gender, weight, \
             address, email, phone, registration_date, membership_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                self.cipher.encrypt(&member.first_name)?,
                self.cipher.encrypt(&member.last_name)?,
                self.cipher.encrypt(&member.age.to_string())?,
                self.cipher.encrypt(&member.gender)?,
                self.cipher.encrypt(&member.weight.to_string())?,
                self.cipher.encrypt(&member.address)?,
                self.cipher.encrypt(&member.email)?,
                self.cipher.encrypt(&member.phone)?,
                registration_date,
                self.cipher.encrypt(&membership_id)?,
            ],
        )?;
        Ok(MemberProfile {
            id: conn.last_insert_rowid(),
            first_name: member.first_name.clone(),
            last_name: member.last_name.clone(),
            age: member.age,
            gender: member.gender.clone(),
            weight: member.weight,
            address: member.address.clone(),
            email: member.email.clone(),
            phone: member.phone.clone(),
            registration_date,
            membership_id,
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<MemberProfile>> {
        let raw = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM members WHERE id = ?1"
            ))?;
            let mut rows = stmt.query_map(params![id], RawMember::from_row)?;
            match rows.next() {
                Some(row) => Some(row?),
                None => None,
            }
        };
        raw.map(|r| self.decrypt_row(r)).transpose()
    }

    /// Decrypts every row and keeps those matching the predicate.
    ///
    /// A row that fails to decrypt aborts the scan with a typed error;
    /// silently skipping it would hide exactly the records that need
    /// attention.
    pub fn find_by_decrypted_predicate<F>(&self, predicate: F) -> Result<Vec<MemberProfile>>
    where
        F: Fn(&MemberProfile) -> bool,
    {
        let raw_rows = {
            let conn = self.conn.lock();
            let mut stmt =
                conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM members ORDER BY id"))?;
            let rows = stmt.query_map([], RawMember::from_row)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        let mut matches = Vec::new();
        for raw in raw_rows {
            let profile = self.decrypt_row(raw)?;
            if predicate(&profile) {
                matches.push(profile);
            }
        }
        Ok(matches)
    }

    /// Case-insensitive substring search across the decrypted identity
    /// fields, mirroring what an indexed LIKE would do on plaintext columns.
    pub fn search(&self, term: &str) -> Result<Vec<MemberProfile>> {
        let needle = term.to_lowercase();
        self.find_by_decrypted_predicate(|m| {
            m.first_name.to_lowercase().contains(&needle)
                || m.last_name.to_lowercase().contains(&needle)
                || m.membership_id.contains(term)
                || m.address.to_lowercase().contains(&needle)
                || m.email.to_lowercase().contains(&needle)
                || m.phone.contains(term)
        })
    }

    pub fn find_by_membership_id(&self, membership_id: &str) -> Result<Option<MemberProfile>> {
        Ok(self
            .find_by_decrypted_predicate(|m| m.membership_id == membership_id)?
            .into_iter()
            .next())
    }

    /// Applies a partial update, re-encrypting each changed field. Returns
    /// the updated profile, or `None` if the membership id is unknown.
    pub fn update(
        &self,
        membership_id: &str,
        changes: &MemberUpdate,
    ) -> Result<Option<MemberProfile>> {
        let Some(mut current) = self.find_by_membership_id(membership_id)? else {
            return Ok(None);
        };
        if let Some(address) = &changes.address {
            current.address = address.clone();
        }
        if let Some(email) = &changes.email {
            current.email = email.clone();
        }
        if let Some(phone) = &changes.phone {
            current.phone = phone.clone();
        }
        if let Some(weight) = changes.weight {
            current.weight = weight;
        }
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE members SET address = ?1, email = ?2, phone = ?3, weight = ?4 WHERE id = ?5",
            params![
                self.cipher.encrypt(&current.address)?,
                self.cipher.encrypt(&current.email)?,
                self.cipher.encrypt(&current.phone)?,
                self.cipher.encrypt(&current.weight.to_string())?,
                current.id,
            ],
        )?;
        Ok(Some(current))
    }

    /// Returns `true` if a member was removed.
    pub fn delete(&self, membership_id: &str) -> Result<bool> {
        let Some(profile) = self.find_by_membership_id(membership_id)? else {
            return Ok(false);
        };
        let conn = self.conn.lock();
        conn.execute("DELETE FROM members WHERE id = ?1", params![profile.id])?;
        Ok(true)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM members", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn decrypt_row(&self, raw: RawMember) -> Result<MemberProfile> {
        let age_text = self.cipher.decrypt(&raw.age)?;
        let weight_text = self.cipher.decrypt(&raw.weight)?;
        Ok(MemberProfile {
            id: raw.id,
            first_name: self.cipher.decrypt(&raw.first_name)?,
            last_name: self.cipher.decrypt(&raw.last_name)?,
            age: age_text
                .parse()
                .map_err(|_| Error::Decryption("age column is not a number".to_string()))?,
            gender: self.cipher.decrypt(&raw.gender)?,
            weight: weight_text
                .parse()
                .map_err(|_| Error::Decryption("weight column is not a number".to_string()))?,
            address: self.cipher.decrypt(&raw.address)?,
            email: self.cipher.decrypt(&raw.email)?,
            phone: self.cipher.decrypt(&raw.phone)?,
            registration_date: raw.registration_date,
            membership_id: self.cipher.decrypt(&raw.membership_id)?,
        })
    }
}

/// Ciphertext row as stored; only this module sees it.
struct RawMember {
    id: i64,
    first_name: String,
    last_name: String,
    age: String,
    gender: String,
    weight: String,
    address: String,
    email: String,
    phone: String,
    registration_date: String,
    membership_id: String,
}

impl RawMember {
    fn from_row(row: &rusqlite::Row<'_>) -> std::result::Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            first_name: row.get(1)?,
            last_name: row.get(2)?,
            age: row.get(3)?,
            gender: row.get(4)?,
            weight: row.get(5)?,
            address: row.get(6)?,
            email: row.get(7)?,
            phone: row.get(8)?,
            registration_date: row.get(9)?,
            membership_id: row.get(10)?,
        })
    }
}

/// Membership id: two-digit year, seven random digits, and a mod-10
/// digit-sum check digit.
pub fn generate_membership_id() -> String {
    let mut id = Local::now().format("%y").to_string();
    let mut rng = rand::thread_rng();
    for _ in 0..7 {
        id.push(char::from(b'0' + rng.gen_range(0..10u8)));
    }
    let check = digit_sum(&id) % 10;
    id.push(char::from(b'0' + check as u8));
    id
}

pub fn verify_membership_id(id: &str) -> bool {
    if id.len() != 10 || !id.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let (base, check) = id.split_at(9);
    digit_sum(base) % 10 == (check.as_bytes()[0] - b'0') as u32
}

fn digit_sum(digits: &str) -> u32 {
    digits.bytes().map(|b| (b - b'0') as u32).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::KeyStore;
    use std::sync::{Arc, OnceLock};
    use tempfile::tempdir;

    fn test_cipher() -> FieldCipher {
        static KEYS: OnceLock<Arc<KeyStore>> = OnceLock::new();
        let keys = KEYS
            .get_or_init(|| Arc::new(KeyStore::ephemeral().unwrap()))
            .clone();
        FieldCipher::new(keys)
    }

    fn sample_member() -> NewMember {
        NewMember {
            first_name: "Maria".to_string(),
            last_name: "Jansen".to_string(),
            age: 34,
            gender: "F".to_string(),
            weight: 63.5,
            address: "Coolsingel 1, 3011AD Rotterdam".to_string(),
            email: "maria.jansen@example.com".to_string(),
            phone: "+31-6-12345678".to_string(),
        }
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let store = MemberStore::open_in_memory(test_cipher()).unwrap();
        let inserted = store.insert(&sample_member()).unwrap();
        assert!(verify_membership_id(&inserted.membership_id));

        let fetched = store.get(inserted.id).unwrap().unwrap();
        assert_eq!(fetched.first_name, "Maria");
        assert_eq!(fetched.age, 34);
        assert_eq!(fetched.weight, 63.5);
        assert_eq!(fetched.membership_id, inserted.membership_id);
    }

    #[test]
    fn identity_columns_hold_ciphertext_not_plaintext() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("members.db");
        let store = MemberStore::open(&db_path, test_cipher()).unwrap();
        store.insert(&sample_member()).unwrap();
        drop(store);

        let conn = Connection::open(&db_path).unwrap();
        let (first_name, email): (String, String) = conn
            .query_row("SELECT first_name, email FROM members", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_ne!(first_name, "Maria");
        assert!(first_name.bytes().all(|b| b.is_ascii_hexdigit()));
        assert!(!email.contains("example.com"));
    }

    #[test]
    fn search_matches_decrypted_substrings() {
        let store = MemberStore::open_in_memory(test_cipher()).unwrap();
        let maria = store.insert(&sample_member()).unwrap();
        let mut other = sample_member();
        other.first_name = "Pieter".to_string();
        other.email = "pieter@example.org".to_string();
        store.insert(&other).unwrap();

        let by_name = store.search("maria").unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].id, maria.id);

        let by_membership = store.search(&maria.membership_id).unwrap();
        assert_eq!(by_membership.len(), 1);

        assert_eq!(store.search("rotterdam").unwrap().len(), 2);
        assert!(store.search("no-such-member").unwrap().is_empty());
    }

    #[test]
    fn update_reencrypts_changed_fields() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("members.db");
        let store = MemberStore::open(&db_path, test_cipher()).unwrap();
        let inserted = store.insert(&sample_member()).unwrap();

        let before: String = Connection::open(&db_path)
            .unwrap()
            .query_row("SELECT email FROM members", [], |row| row.get(0))
            .unwrap();

        let updated = store
            .update(
                &inserted.membership_id,
                &MemberUpdate {
                    email: Some("new@example.com".to_string()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.email, "new@example.com");
        assert_eq!(updated.address, inserted.address);

        let after: String = Connection::open(&db_path)
            .unwrap()
            .query_row("SELECT email FROM members", [], |row| row.get(0))
            .unwrap();
        assert_ne!(before, after);
        let fetched = store.get(inserted.id).unwrap().unwrap();
        assert_eq!(fetched.email, "new@example.com");
    }

    #[test]
    fn update_unknown_membership_id_is_none() {
        let store = MemberStore::open_in_memory(test_cipher()).unwrap();
        let result = store.update("0000000000", &MemberUpdate::default()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn delete_by_membership_id() {
        let store = MemberStore::open_in_memory(test_cipher()).unwrap();
        let inserted = store.insert(&sample_member()).unwrap();
        assert!(store.delete(&inserted.membership_id).unwrap());
        assert!(!store.delete(&inserted.membership_id).unwrap());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn foreign_key_rows_fail_the_scan_loudly() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("members.db");
        let store = MemberStore::open(&db_path, test_cipher()).unwrap();
        store.insert(&sample_member()).unwrap();
        drop(store);

        let foreign = FieldCipher::new(Arc::new(KeyStore::ephemeral().unwrap()));
        let store = MemberStore::open(&db_path, foreign).unwrap();
        assert!(matches!(
            store.find_by_decrypted_predicate(|_| true),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn membership_id_checksum() {
        for _ in 0..20 {
            assert!(verify_membership_id(&generate_membership_id()));
        }
        assert!(!verify_membership_id("123"));
        assert!(!verify_membership_id("26abc45678"));
        let id = generate_membership_id();
        // Corrupt the check digit.
        let mut bad = id[..9].to_string();
        let check = id.as_bytes()[9] - b'0';
        bad.push(char::from(b'0' + (check + 1) % 10));
        assert!(!verify_membership_id(&bad));
    }
}
