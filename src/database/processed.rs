//! Durable record of what already happened to each file name.
//!
//! Both tables live in one redb file next to each other:
//! - `processed`: files whose upload succeeded. Never resubmitted.
//! - `failed`: files that ended in Failed. Skipped until an operator clears them.
//!
//! Every write is a single committed transaction, so a crash leaves either the
//! old or the new membership on disk and never a torn record.

use anyhow::{Context, Result};
use log::info;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashSet;
use std::path::Path;

pub const PROCESSED_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("processed");

pub const FAILED_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("failed");

#[derive(Debug, Clone, PartialEq, Eq, bitcode::Encode, bitcode::Decode)]
pub struct ProcessedSchema {
    pub uploaded_at_ms: i64,
    pub target_url: String,
    pub attempts: u32,
    /// blake3 of the original bytes as sent.
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, bitcode::Encode, bitcode::Decode)]
pub struct FailedSchema {
    pub failed_at_ms: i64,
    pub stage: String,
    pub reason: String,
}

pub struct ProcessedSet {
    in_disk: Database,
}

impl ProcessedSet {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory tree for {:?}", parent))?;
        }

        let in_disk = Database::create(path)
            .with_context(|| format!("failed to open processed database {:?}", path))?;

        let txn = in_disk.begin_write()?;
        {
            let _ = txn.open_table(PROCESSED_TABLE)?;
            let _ = txn.open_table(FAILED_TABLE)?;
        }
        txn.commit()?;

        let set = Self { in_disk };
        info!(
            "Opened {:?}: {} processed, {} failed",
            path,
            set.processed_names()?.len(),
            set.failed_names()?.len()
        );
        Ok(set)
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        let txn = self.in_disk.begin_read()?;
        let table = txn.open_table(PROCESSED_TABLE)?;
        Ok(table.get(name)?.is_some())
    }

    pub fn get(&self, name: &str) -> Result<Option<ProcessedSchema>> {
        let txn = self.in_disk.begin_read()?;
        let table = txn.open_table(PROCESSED_TABLE)?;
        match table.get(name)? {
            Some(bytes) => Ok(Some(bitcode::decode(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Record a successful upload. The file also leaves the failure log in the same transaction.
    pub fn mark_uploaded(&self, name: &str, record: &ProcessedSchema) -> Result<()> {
        let txn = self.in_disk.begin_write()?;
        {
            let bytes = bitcode::encode(record);
            txn.open_table(PROCESSED_TABLE)?
                .insert(name, bytes.as_slice())?;
            txn.open_table(FAILED_TABLE)?.remove(name)?;
        }
        txn.commit()
            .with_context(|| format!("failed to commit processed record for {}", name))?;
        Ok(())
    }

    pub fn mark_failed(&self, name: &str, record: &FailedSchema) -> Result<()> {
        let txn = self.in_disk.begin_write()?;
        {
            let bytes = bitcode::encode(record);
            txn.open_table(FAILED_TABLE)?
                .insert(name, bytes.as_slice())?;
        }
        txn.commit()
            .with_context(|| format!("failed to commit failure record for {}", name))?;
        Ok(())
    }

    pub fn failure(&self, name: &str) -> Result<Option<FailedSchema>> {
        let txn = self.in_disk.begin_read()?;
        let table = txn.open_table(FAILED_TABLE)?;
        match table.get(name)? {
            Some(bytes) => Ok(Some(bitcode::decode(bytes.value())?)),
            None => Ok(None),
        }
    }

    pub fn processed_names(&self) -> Result<HashSet<String>> {
        self.names(PROCESSED_TABLE)
    }

    pub fn failed_names(&self) -> Result<HashSet<String>> {
        self.names(FAILED_TABLE)
    }

    /// Forget every recorded failure so those files are picked up again. Returns how many were cleared.
    pub fn clear_failed(&self) -> Result<usize> {
        let names = self.failed_names()?;
        let txn = self.in_disk.begin_write()?;
        {
            let mut table = txn.open_table(FAILED_TABLE)?;
            for name in &names {
                table.remove(name.as_str())?;
            }
        }
        txn.commit()?;
        Ok(names.len())
    }

    fn names(
        &self,
        definition: TableDefinition<'static, &'static str, &'static [u8]>,
    ) -> Result<HashSet<String>> {
        let txn = self.in_disk.begin_read()?;
        let table = txn.open_table(definition)?;
        let mut names = HashSet::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            names.insert(key.value().to_string());
        }
        Ok(names)
    }
}
