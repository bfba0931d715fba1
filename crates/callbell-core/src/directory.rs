//! Device directory - static lookup of call-button devices.
//!
//! Built once at startup from a CSV table with a header row and five
//! columns per row:
//!
//! ```text
//! ip,circuit,type,bedNumber,bay
//! 10.0.4.21,2,ICU,14,7
//! ```
//!
//! The bed identifier is derived as `circuit/type/bedNumber`. Rows with the
//! wrong column count are skipped silently, rows with a non-numeric bay are
//! skipped with a warning. A missing file is reported, never fatal: callers
//! that must keep running use [`DeviceDirectory::load_or_empty`].
//!
//! When several rows share a key (same ip, same bay), the later row wins.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::device::{Bay, BedId, DeviceAddress};
use crate::error::{DomainError, DomainResult};

/// Number of columns a well-formed directory row carries.
pub const DIRECTORY_COLUMNS: usize = 5;

/// One well-formed directory row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Device IP as written in the table
    pub ip: String,
    /// Derived `circuit/type/bedNumber` identifier
    pub bed: BedId,
    /// Bay slot
    pub bay: Bay,
}

/// Bidirectional lookup between device IPs and logical bed/bay slots.
#[derive(Debug, Clone, Default)]
pub struct DeviceDirectory {
    entries: Vec<DirectoryEntry>,
    bed_by_ip: HashMap<String, BedId>,
    bay_by_ip_bed: HashMap<(String, BedId), Bay>,
    slot_by_bay: HashMap<Bay, (String, BedId)>,
}

impl DeviceDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the directory from a CSV file.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::DirectoryRead` if the file cannot be opened.
    /// Individual bad rows never fail the load.
    pub fn load(path: impl AsRef<Path>) -> DomainResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| DomainError::DirectoryRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let directory = Self::from_reader(file);
        info!(
            path = %path.display(),
            rows = directory.len(),
            devices = directory.addresses().len(),
            "Device directory loaded"
        );
        Ok(directory)
    }

    /// Loads the directory, logging and swallowing a read failure.
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(directory) => directory,
            Err(e) => {
                error!(error = %e, "Error reading device directory, continuing with no devices");
                Self::new()
            }
        }
    }

    /// Parses a directory table from any reader. The first row is the header.
    pub fn from_reader<R: Read>(reader: R) -> Self {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut directory = Self::new();
        for (index, result) in csv_reader.records().enumerate() {
            // +2: one for the header, one for 1-based numbering
            let line = index + 2;
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    warn!(line, error = %e, "Unreadable directory row skipped");
                    continue;
                }
            };

            if record.len() != DIRECTORY_COLUMNS {
                debug!(line, columns = record.len(), "Malformed directory row skipped");
                continue;
            }
            let fields: Vec<&str> = record.iter().collect();
            let [ip, circuit, kind, bed_number, bay] = fields.as_slice() else {
                continue;
            };

            let bay = match bay.parse::<Bay>() {
                Ok(bay) => bay,
                Err(e) => {
                    warn!(line, error = %e, "Directory row with invalid bay skipped");
                    continue;
                }
            };

            directory.insert(DirectoryEntry {
                ip: (*ip).to_string(),
                bed: BedId::from_parts(circuit, kind, bed_number),
                bay,
            });
        }

        directory
    }

    /// Adds one entry, overriding earlier rows with the same keys.
    pub fn insert(&mut self, entry: DirectoryEntry) {
        self.bed_by_ip.insert(entry.ip.clone(), entry.bed.clone());
        self.bay_by_ip_bed
            .insert((entry.ip.clone(), entry.bed.clone()), entry.bay);
        self.slot_by_bay
            .insert(entry.bay, (entry.ip.clone(), entry.bed.clone()));
        self.entries.push(entry);
    }

    /// Distinct device IPs, sorted.
    pub fn addresses(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.ip.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Distinct device addresses with the process-wide `port` stamped on.
    pub fn device_addresses(&self, port: u16) -> Vec<DeviceAddress> {
        self.addresses()
            .into_iter()
            .map(|ip| DeviceAddress::new(ip, port))
            .collect()
    }

    /// Bed served by the device at `ip`.
    pub fn bed_for_ip(&self, ip: &str) -> Option<&BedId> {
        self.bed_by_ip.get(ip)
    }

    /// Bay a bed is wired to on the device at `ip`.
    pub fn bay_for_bed(&self, ip: &str, bed: &BedId) -> Option<Bay> {
        self.bay_by_ip_bed
            .get(&(ip.to_string(), bed.clone()))
            .copied()
    }

    /// `(ip, bed)` pair wired to `bay`.
    pub fn bed_for_bay(&self, bay: Bay) -> Option<(&str, &BedId)> {
        self.slot_by_bay
            .get(&bay)
            .map(|(ip, bed)| (ip.as_str(), bed))
    }

    /// Device IP wired to `bay`.
    pub fn ip_for_bay(&self, bay: Bay) -> Option<&str> {
        self.slot_by_bay.get(&bay).map(|(ip, _)| ip.as_str())
    }

    /// Well-formed rows in table order.
    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    /// Number of well-formed rows.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
