//! Analyzed-language identification.
//!
//! The engine is language-generic: parsing and IL lowering happen upstream,
//! and only a handful of policy knobs depend on the source language. Those
//! knobs are collected here so the rest of the engine asks questions
//! ("does this language do field-sensitive inheritance?") instead of
//! matching on language names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Source language of the function under analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Java,
    JavaScript,
    TypeScript,
    Python,
    Go,
    /// Any other language: generic behavior, no language-specific heuristics.
    #[default]
    Other,
}

impl Language {
    /// Whether polymorphic field taint is extended through field offsets.
    ///
    /// Dynamic/OO languages where `x.f` chains commonly smuggle data across
    /// function boundaries get field-sensitive summaries; everything else
    /// keeps polymorphic taint at the variable root.
    #[inline]
    pub fn supports_field_sensitivity(self) -> bool {
        matches!(
            self,
            Language::Java | Language::JavaScript | Language::TypeScript | Language::Python
        )
    }

    /// Whether undefined `getX`/`setX` callees are treated as bean-style
    /// property accessors.
    #[inline]
    pub fn has_bean_accessors(self) -> bool {
        matches!(self, Language::Java)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Java => write!(f, "java"),
            Language::JavaScript => write!(f, "javascript"),
            Language::TypeScript => write!(f, "typescript"),
            Language::Python => write!(f, "python"),
            Language::Go => write!(f, "go"),
            Language::Other => write!(f, "other"),
        }
    }
}
