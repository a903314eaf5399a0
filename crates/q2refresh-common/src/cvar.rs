// Copyright (C) 1997-2001 Id Software, Inc.
// GPL-2.0-or-later
//
// cvar.c -> cvar.rs
// Console variables backing the refresh configuration

use crate::q_shared::atof;

use std::collections::HashMap;

pub const CVAR_ARCHIVE: i32 = 1;
/// Only the engine may change it, the console refuses.
pub const CVAR_NOSET: i32 = 8;

/// A console variable.
#[derive(Debug, Clone)]
pub struct Cvar {
    pub name: String,
    pub string: String,
    pub default_string: String,
    pub flags: i32,
    pub modified: bool,
    pub value: f32,
}

/// Name-indexed cvar store.
#[derive(Debug, Default)]
pub struct CvarContext {
    pub cvar_vars: Vec<Cvar>,
    /// name -> index in cvar_vars
    cvar_index: HashMap<String, usize>,
}

impl CvarContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_var(&self, name: &str) -> Option<&Cvar> {
        self.cvar_index.get(name).map(|&idx| &self.cvar_vars[idx])
    }

    pub fn find_var_mut(&mut self, name: &str) -> Option<&mut Cvar> {
        match self.cvar_index.get(name) {
            Some(&idx) => Some(&mut self.cvar_vars[idx]),
            None => None,
        }
    }

    /// Floating-point value of a cvar, 0 if not found.
    pub fn variable_value(&self, name: &str) -> f32 {
        self.find_var(name).map_or(0.0, |v| v.value)
    }

    /// String value of a cvar, "" if not found.
    pub fn variable_string(&self, name: &str) -> &str {
        self.find_var(name).map_or("", |v| v.string.as_str())
    }

    /// Get or create a cvar. If it already exists the value is kept but the
    /// flags are OR'd in.
    pub fn get(&mut self, name: &str, value: &str, flags: i32) -> usize {
        if let Some(&idx) = self.cvar_index.get(name) {
            self.cvar_vars[idx].flags |= flags;
            return idx;
        }

        let idx = self.cvar_vars.len();
        self.cvar_vars.push(Cvar {
            name: name.to_string(),
            string: value.to_string(),
            default_string: value.to_string(),
            flags,
            modified: true,
            value: atof(value),
        });
        self.cvar_index.insert(name.to_string(), idx);
        idx
    }

    fn set_internal(&mut self, name: &str, value: &str, force: bool) -> Option<usize> {
        let Some(&idx) = self.cvar_index.get(name) else {
            return Some(self.get(name, value, 0));
        };
        let var = &mut self.cvar_vars[idx];
        if !force && var.flags & CVAR_NOSET != 0 {
            log::info!("{} is write protected.", name);
            return None;
        }
        if var.string == value {
            return Some(idx);
        }
        var.modified = true;
        var.string = value.to_string();
        var.value = atof(value);
        Some(idx)
    }

    /// Set from the console; write-protected variables are refused.
    pub fn set(&mut self, name: &str, value: &str) -> Option<usize> {
        self.set_internal(name, value, false)
    }

    pub fn force_set(&mut self, name: &str, value: &str) -> Option<usize> {
        self.set_internal(name, value, true)
    }

    pub fn set_value(&mut self, name: &str, value: f32) -> Option<usize> {
        let s = if value == value.trunc() {
            format!("{}", value as i32)
        } else {
            format!("{}", value)
        };
        self.set_internal(name, &s, false)
    }

    /// Returns whether the cvar changed since the last call and clears the flag.
    pub fn take_modified(&mut self, name: &str) -> bool {
        match self.find_var_mut(name) {
            Some(v) => std::mem::replace(&mut v.modified, false),
            None => false,
        }
    }
}
