// Copyright (C) 1997-2001 Id Software, Inc.
// GPL-2.0-or-later
//
// cmd.c -> cmd.rs
// Console command tokenizing and dispatch

use crate::q_shared::com_parse;

use std::collections::HashMap;

pub const MAX_STRING_TOKENS: usize = 80;

/// One tokenized command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdArgs {
    argv: Vec<String>,
    /// everything after the first token, untokenized
    args: String,
}

impl CmdArgs {
    /// Splits `text` into tokens. Stops at the first newline.
    pub fn tokenize(text: &str) -> Self {
        let mut out = CmdArgs::default();
        let line = text.split('\n').next().unwrap_or("");
        let mut rest = Some(line);

        while let Some(data) = rest {
            let trimmed = data.trim_start();
            if trimmed.is_empty() {
                break;
            }
            if out.argv.len() == 1 {
                out.args = trimmed.trim_end().to_string();
            }
            let (token, next) = com_parse(trimmed);
            if next.is_none() && token.is_empty() {
                break;
            }
            if out.argv.len() < MAX_STRING_TOKENS {
                out.argv.push(token);
            }
            rest = next;
        }
        out
    }

    pub fn argc(&self) -> usize {
        self.argv.len()
    }

    /// Token `i`, or "" when out of range.
    pub fn argv(&self, i: usize) -> &str {
        self.argv.get(i).map_or("", |s| s.as_str())
    }

    pub fn args(&self) -> &str {
        &self.args
    }
}

/// Handler invoked with the owning context, the arguments and an output sink.
pub type CmdFunction<T> = fn(&mut T, &CmdArgs, &mut String);

/// Named command table dispatching into a context of type `T`.
pub struct CmdRegistry<T> {
    functions: HashMap<String, CmdFunction<T>>,
}

impl<T> Default for CmdRegistry<T> {
    fn default() -> Self {
        Self { functions: HashMap::new() }
    }
}

impl<T> CmdRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name`; a second registration of the same name is ignored.
    pub fn add_command(&mut self, name: &str, function: CmdFunction<T>) {
        if self.functions.contains_key(name) {
            log::warn!("Cmd_AddCommand: {} already defined", name);
            return;
        }
        self.functions.insert(name.to_string(), function);
    }

    pub fn remove_command(&mut self, name: &str) {
        self.functions.remove(name);
    }

    pub fn exists(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Tokenizes and runs `text`. Returns the command's output, or None if
    /// the line is empty or names no registered command.
    pub fn execute(&self, ctx: &mut T, text: &str) -> Option<String> {
        let args = CmdArgs::tokenize(text);
        if args.argc() == 0 {
            return None;
        }
        let function = self.functions.get(args.argv(0))?;
        let mut out = String::new();
        function(ctx, &args, &mut out);
        Some(out)
    }
}
