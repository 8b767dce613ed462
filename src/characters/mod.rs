//! Keyed CRUD store for campaign characters. The pipeline reads the full
//! set on every scene composition; edits come in through the HTTP API.

use crate::persist::{read_json_or_default, write_json_atomic};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    pub description: String,
}

pub struct CharacterStore {
    path: PathBuf,
    characters: RwLock<HashMap<String, Character>>,
}

impl CharacterStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        let characters = read_json_or_default(&path)?;
        Ok(Self {
            path,
            characters: RwLock::new(characters),
        })
    }

    pub async fn list(&self) -> HashMap<String, Character> {
        self.characters.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Character> {
        self.characters.read().await.get(id).cloned()
    }

    pub async fn upsert(&self, id: &str, character: Character) -> Result<()> {
        let mut characters = self.characters.write().await;
        let mut next = characters.clone();
        next.insert(id.to_string(), character);

        write_json_atomic(&self.path, &next)?;
        *characters = next;

        Ok(())
    }

    /// Remove a character. Returns false if the id was unknown.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let mut characters = self.characters.write().await;
        if !characters.contains_key(id) {
            return Ok(false);
        }

        let mut next = characters.clone();
        next.remove(id);

        write_json_atomic(&self.path, &next)?;
        *characters = next;

        Ok(true)
    }
}
