// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::fmt;

/// A domain identity that owns exactly one stream.
pub trait Identity: fmt::Display {
    /// Stable stream name. Must never change for a given identity.
    fn stream_name(&self) -> String {
        self.to_string()
    }
}

impl Identity for str {}

impl Identity for String {}
