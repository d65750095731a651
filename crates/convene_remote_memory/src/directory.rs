//! The discoverable-user directory.

use convene_records::{identities_match, RemoteUserInfo};

struct DirectoryEntry {
    info: RemoteUserInfo,
    emails: Vec<String>,
}

/// Discoverable users known to the service, with their lookup addresses.
#[derive(Default)]
pub(crate) struct Directory {
    entries: Vec<DirectoryEntry>,
}

impl Directory {
    /// Lists a user, replacing any previous listing of the same record id.
    /// Addresses are matched case-insensitively, so they are stored folded.
    pub(crate) fn register(&mut self, info: RemoteUserInfo, emails: Vec<String>) {
        let emails: Vec<String> = emails
            .into_iter()
            .map(|email| email.to_ascii_lowercase())
            .collect();
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| identities_match(&entry.info.record_id, &info.record_id))
        {
            entry.info = info;
            entry.emails = emails;
        } else {
            self.entries.push(DirectoryEntry { info, emails });
        }
    }

    /// Every listed user, in registration order.
    pub(crate) fn all(&self) -> Vec<RemoteUserInfo> {
        self.entries.iter().map(|entry| entry.info.clone()).collect()
    }

    /// Users listed under any of the given addresses, in request order.
    /// Unknown addresses contribute nothing; a user reached through two
    /// addresses appears once.
    pub(crate) fn lookup_by_email(&self, emails: &[String]) -> Vec<RemoteUserInfo> {
        let mut found: Vec<RemoteUserInfo> = Vec::new();
        for email in emails {
            let email = email.to_ascii_lowercase();
            for entry in &self.entries {
                if !entry.emails.contains(&email) {
                    continue;
                }
                let already = found
                    .iter()
                    .any(|info| identities_match(&info.record_id, &entry.info.record_id));
                if !already {
                    found.push(entry.info.clone());
                }
            }
        }
        found
    }
}
