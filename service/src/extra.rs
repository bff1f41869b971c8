//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//


//! Per-connection data shared between the host and the script

use crate::error::ScriptError;
use crate::host::Host;
use crate::script::Value;
use crate::types::ConnectionId;
use std::collections::HashMap;
use std::fmt;

/// Field holding the client's terminal width, maintained from NAWS
pub const WIDTH: &str = "width";

/// Field holding the client's terminal height, maintained from NAWS
pub const HEIGHT: &str = "height";

/// Prompt sent when no other prompt has been set
pub const DEFAULT_PROMPT: &str = "? ";

/// Callback producing a prompt for a connection
pub type PromptCallback =
    Box<dyn FnMut(&mut Host<'_>, ConnectionId) -> Result<String, ScriptError>>;

/// What is sent to a connection once it has output and nothing left to do
pub enum Prompt {
    /// Fixed text
    Text(String),
    /// Computed on every prompt
    Callback(PromptCallback),
}

impl Prompt {
    /// Wraps a closure as a prompt callback
    pub fn callback<F>(callback: F) -> Prompt
    where
        F: FnMut(&mut Host<'_>, ConnectionId) -> Result<String, ScriptError> + 'static,
    {
        Prompt::Callback(Box::new(callback))
    }
}

impl Default for Prompt {
    fn default() -> Self {
        Prompt::Text(DEFAULT_PROMPT.to_string())
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Prompt::Text(text.to_string())
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Prompt::Text(text)
    }
}

impl fmt::Debug for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prompt::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Prompt::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Data attached to a connection's continuation
///
/// The host writes only [`WIDTH`] and [`HEIGHT`]; every other field belongs to the script.
#[derive(Debug)]
pub struct ExtraData {
    prompt: Option<Prompt>,
    fields: HashMap<String, Value>,
}

impl ExtraData {
    /// Create extra data with the default prompt
    pub fn new() -> ExtraData {
        ExtraData {
            prompt: Some(Prompt::default()),
            fields: HashMap::new(),
        }
    }

    /// Look up a field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Set a field, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    /// Remove a field
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// Whether a field is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// All fields
    pub fn fields(&self) -> &HashMap<String, Value> {
        &self.fields
    }

    /// Reported terminal size as `(width, height)`
    pub fn window_size(&self) -> Option<(u16, u16)> {
        let width = self.get(WIDTH)?.as_number()?;
        let height = self.get(HEIGHT)?.as_number()?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some((width as u16, height as u16))
    }

    /// The current prompt. `None` only while a prompt callback is running.
    pub fn prompt(&self) -> Option<&Prompt> {
        self.prompt.as_ref()
    }

    /// Replace the prompt
    pub fn set_prompt(&mut self, prompt: impl Into<Prompt>) {
        self.prompt = Some(prompt.into());
    }

    pub(crate) fn set_window_size(&mut self, width: u16, height: u16) {
        self.insert(WIDTH, f64::from(width));
        self.insert(HEIGHT, f64::from(height));
    }

    pub(crate) fn clear_window_size(&mut self) {
        self.remove(WIDTH);
        self.remove(HEIGHT);
    }

    pub(crate) fn take_prompt(&mut self) -> Option<Prompt> {
        self.prompt.take()
    }

    /// Puts a prompt back unless a new one was set in the meantime
    pub(crate) fn restore_prompt(&mut self, prompt: Prompt) {
        if self.prompt.is_none() {
            self.prompt = Some(prompt);
        }
    }
}

impl Default for ExtraData {
    fn default() -> Self {
        ExtraData::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_has_default_prompt() {
        let extra = ExtraData::new();
        assert!(matches!(extra.prompt(), Some(Prompt::Text(text)) if text == "? "));
        assert!(extra.fields().is_empty());
    }

    #[test]
    fn test_window_size_fields() {
        let mut extra = ExtraData::new();
        assert_eq!(extra.window_size(), None);
        extra.set_window_size(80, 24);
        assert_eq!(extra.get(WIDTH), Some(&Value::Number(80.0)));
        assert_eq!(extra.window_size(), Some((80, 24)));
        extra.clear_window_size();
        assert!(!extra.contains_key(WIDTH));
        assert!(!extra.contains_key(HEIGHT));
    }

    #[test]
    fn test_restore_keeps_newer_prompt() {
        let mut extra = ExtraData::new();
        let taken = extra.take_prompt().unwrap();
        assert!(extra.prompt().is_none());
        extra.set_prompt("> ");
        extra.restore_prompt(taken);
        assert!(matches!(extra.prompt(), Some(Prompt::Text(text)) if text == "> "));
    }
}
