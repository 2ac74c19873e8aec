//! System preamble built from the user's stored profile.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use switchboard_core::store::{ProfileStore, UserProfile};
use tracing::warn;

/// Instruction every conversation starts with.
pub const BASE_INSTRUCTION: &str = "You are a helpful, accurate assistant. \
Answer clearly and concisely, and say so when you are unsure.";

#[derive(Clone)]
pub struct ProfileEnricher {
    store: Arc<dyn ProfileStore>,
}

impl ProfileEnricher {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self { store }
    }

    /// The system instruction for `user_id`. A missing, empty or unreadable
    /// profile yields [`BASE_INSTRUCTION`] unchanged.
    pub async fn system_prompt(&self, user_id: &str, now: DateTime<Utc>) -> String {
        match self.store.load_profile(user_id).await {
            Ok(Some(profile)) => render(&profile, now),
            Ok(None) => BASE_INSTRUCTION.to_string(),
            Err(e) => {
                warn!(user_id, error = %e, "Profile lookup failed");
                BASE_INSTRUCTION.to_string()
            }
        }
    }
}

/// Render a profile into the system instruction. Expired "currently"
/// entries are left out.
pub fn render(profile: &UserProfile, now: DateTime<Utc>) -> String {
    let current: Vec<_> = profile.currently.iter().filter(|c| c.is_active(now)).collect();
    if profile.facts.is_empty() && current.is_empty() {
        return BASE_INSTRUCTION.to_string();
    }

    let mut out = format!(
        "{BASE_INSTRUCTION}\n\n\
         Below is what the user has told you about themselves. Use it only when \
         it is relevant to their request and do not bring it up otherwise.\n\n\
         --- USER PROFILE ---\n"
    );

    if !profile.facts.is_empty() {
        out.push_str("About the user:\n");
        for fact in &profile.facts {
            out.push_str(&format!("- {fact}\n"));
        }
    }
    if !current.is_empty() {
        out.push_str("Currently:\n");
        for item in current {
            match item.expires_at {
                Some(until) => out.push_str(&format!("- {} (until {})\n", item.text, until.format("%Y-%m-%d"))),
                None => out.push_str(&format!("- {}\n", item.text)),
            }
        }
    }
    out.push_str("--- END USER PROFILE ---");
    out
}
