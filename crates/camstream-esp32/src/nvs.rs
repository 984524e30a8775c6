//! NVS (Non-Volatile Storage) bring-up.
//!
//! The WiFi driver keeps calibration data in NVS, so the default partition
//! must be initialized before WiFi starts.

use anyhow::Result;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::info;

/// Take the default NVS partition.
///
/// ESP-IDF erases and re-initializes the partition when it has no free pages
/// or was written by a newer NVS version; any other failure is fatal.
pub fn init() -> Result<EspDefaultNvsPartition> {
    let nvs = EspDefaultNvsPartition::take()?;
    info!("NVS initialized");
    Ok(nvs)
}
