//! Shared fixtures for the pillbox CLI tests.

#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A store with one manual calendar ("home") and one automatic one ("office")
pub const STORE_FIXTURE: &str = r#"{
  "calendars": [
    {
      "id": "home",
      "name": "Home",
      "stock_decrement_mode": "manual",
      "boxes": [
        {
          "id": "doliprane",
          "name": "Doliprane",
          "dose": "1 g",
          "stock_quantity": 20,
          "stock_alert_threshold": 5,
          "box_capacity": 30,
          "rules": [
            { "tablet_count": 1, "interval_days": 2, "start_date": "2025-03-30", "time_of_day": "morning" }
          ]
        },
        {
          "id": "kardegic",
          "name": "Kardegic",
          "dose": "75 mg",
          "stock_quantity": 4,
          "stock_alert_threshold": 5,
          "box_capacity": 30,
          "rules": [
            { "tablet_count": 0.5, "interval_days": 1, "start_date": "2025-01-01", "time_of_day": "evening" }
          ]
        }
      ]
    },
    {
      "id": "office",
      "name": "Office",
      "stock_decrement_mode": "automatic",
      "boxes": [
        {
          "id": "zinc",
          "name": "Zinc",
          "dose": "15 mg",
          "stock_quantity": 30,
          "stock_alert_threshold": 0,
          "box_capacity": 30,
          "rules": [
            { "tablet_count": 1, "interval_days": 1, "start_date": null, "time_of_day": "noon" }
          ]
        }
      ]
    }
  ]
}"#;

pub struct TestEnv {
    pub dir: TempDir,
}

impl TestEnv {
    /// Temp data directory seeded with the fixture store
    pub fn with_fixture() -> Self {
        Self::with_store(STORE_FIXTURE)
    }

    pub fn with_store(contents: &str) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        std::fs::write(dir.path().join("store.json"), contents).expect("Failed to write store");
        Self { dir }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// The CLI pointed at this data directory, with an empty config home
    pub fn cli(&self) -> Command {
        let mut cmd = Command::cargo_bin("pillbox").expect("Failed to find pillbox binary");
        cmd.env("XDG_CONFIG_HOME", self.dir.path().join("config"))
            .env_remove("RUST_LOG")
            .arg("--data-dir")
            .arg(self.dir.path());
        cmd
    }

    pub fn stock_of(&self, box_id: &str) -> serde_json::Value {
        stock_in(&self.path("store.json"), box_id)
    }
}

pub fn stock_in(store_path: &Path, box_id: &str) -> serde_json::Value {
    let contents = std::fs::read_to_string(store_path).expect("Failed to read store");
    let store: serde_json::Value = serde_json::from_str(&contents).expect("Store is not JSON");
    store["calendars"]
        .as_array()
        .expect("calendars array")
        .iter()
        .flat_map(|c| c["boxes"].as_array().cloned().unwrap_or_default())
        .find(|b| b["id"] == box_id)
        .map(|b| b["stock_quantity"].clone())
        .expect("box not found")
}
