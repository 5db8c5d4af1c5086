use std::collections::HashMap;

use anyhow::{bail, Result};

pub const CREATE_SESSION: &str = "CREATE_SESSION";
pub const LOAD_USER: &str = "LOAD_USER";
pub const LOAD_GROUP: &str = "LOAD_GROUP";
pub const SET_CALLBACK_QUERY: &str = "SET_CALLBACK_QUERY";
pub const PROCESS_CALLBACK_QUERY: &str = "PROCESS_CALLBACK_QUERY";
pub const PROCESS_INPUT: &str = "PROCESS_INPUT";
pub const COMMIT_SESSION: &str = "COMMIT_SESSION";
pub const ROLLBACK_SESSION: &str = "ROLLBACK_SESSION";
pub const RESET_CALLBACK_QUERY: &str = "RESET_CALLBACK_QUERY";
pub const RESET_GROUP: &str = "RESET_GROUP";
pub const RESET_USER: &str = "RESET_USER";
pub const CLOSE_SESSION: &str = "CLOSE_SESSION";

const LEFT_START: i32 = -1000;
const RIGHT_START: i32 = 1000;

/// Hands out named dispatcher group numbers. Left groups count up from -1000 and
/// run before the business handlers at 0; right groups count down from 1000 and
/// run after them.
#[derive(Debug)]
pub struct GroupManager {
    groups: HashMap<String, i32>,
    next_left: i32,
    next_right: i32,
}

impl Default for GroupManager {
    fn default() -> Self {
        GroupManager::new()
    }
}

impl GroupManager {
    pub fn new() -> Self {
        GroupManager {
            groups: HashMap::new(),
            next_left: LEFT_START,
            next_right: RIGHT_START,
        }
    }

    /// Manager with the built-in session, user and GUI groups already allocated.
    pub fn with_defaults() -> Result<Self> {
        let mut manager = GroupManager::new();
        for name in [
            CREATE_SESSION,
            LOAD_USER,
            LOAD_GROUP,
            SET_CALLBACK_QUERY,
            PROCESS_CALLBACK_QUERY,
            PROCESS_INPUT,
        ] {
            manager.add_left(name)?;
        }
        for name in [
            CLOSE_SESSION,
            RESET_USER,
            RESET_GROUP,
            RESET_CALLBACK_QUERY,
            ROLLBACK_SESSION,
            COMMIT_SESSION,
        ] {
            manager.add_right(name)?;
        }
        Ok(manager)
    }

    pub fn add_left(&mut self, name: &str) -> Result<i32> {
        if self.next_left >= 0 {
            bail!("no left dispatcher groups left for {}", name);
        }
        let group = self.insert(name, self.next_left)?;
        self.next_left += 1;
        Ok(group)
    }

    pub fn add_right(&mut self, name: &str) -> Result<i32> {
        if self.next_right <= 0 {
            bail!("no right dispatcher groups left for {}", name);
        }
        let group = self.insert(name, self.next_right)?;
        self.next_right -= 1;
        Ok(group)
    }

    fn insert(&mut self, name: &str, group: i32) -> Result<i32> {
        if self.groups.contains_key(name) {
            bail!("dispatcher group {} already exists", name);
        }
        self.groups.insert(name.to_string(), group);
        Ok(group)
    }

    pub fn get(&self, name: &str) -> Result<i32> {
        match self.groups.get(name) {
            Some(group) => Ok(*group),
            None => bail!("unknown dispatcher group {}", name),
        }
    }
}
