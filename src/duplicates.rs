//! Detection of user accounts that belong to the same person, and the
//! review that has to happen before they are merged.
//!
//! Two users are duplicates when their e-mail addresses are equal, or when
//! their first and last names are equal (both ignoring case and surrounding
//! whitespace). Duplicates form groups transitively; the user with the
//! lowest id is the primary of its group.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::err::Error;
use crate::models::{User, UserId};

/// Primary user id mapped to the ids of its aliases, in ascending order.
pub type DuplicateMapping = BTreeMap<UserId, Vec<UserId>>;

pub fn find_duplicate_users(users: &[User]) -> DuplicateMapping {
    let mut parent: Vec<usize> = (0..users.len()).collect();

    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    for (i, user) in users.iter().enumerate() {
        for key in match_keys(user) {
            match seen.get(&key) {
                Some(&j) => {
                    let (a, b) = (root(&mut parent, i), root(&mut parent, j));
                    if a != b {
                        parent[a] = b;
                    }
                }
                None => {
                    seen.insert(key, i);
                }
            }
        }
    }

    let mut groups: HashMap<usize, Vec<UserId>> = HashMap::new();
    for (i, user) in users.iter().enumerate() {
        let r = root(&mut parent, i);
        groups.entry(r).or_default().push(user.id);
    }

    groups
        .into_values()
        .filter(|ids| ids.len() > 1)
        .map(|mut ids| {
            ids.sort_unstable();
            let primary = ids.remove(0);
            (primary, ids)
        })
        .collect()
}

fn match_keys(user: &User) -> Vec<String> {
    let mut keys = Vec::with_capacity(2);
    let email = user.email.trim().to_lowercase();
    if !email.is_empty() {
        keys.push(format!("email:{}", email));
    }
    let first = user.first_name.trim().to_lowercase();
    let last = user.last_name.trim().to_lowercase();
    if !first.is_empty() && !last.is_empty() {
        keys.push(format!("name:{}\u{0}{}", first, last));
    }
    keys
}

/// Form key an administrator sets to `yes` to merge `alias` into `primary`.
pub fn pair_key(primary: UserId, alias: UserId) -> String {
    format!("{}-{}", primary, alias)
}

/// The subset of `candidates` the administrator confirmed.
pub fn confirmed_subset(
    candidates: &DuplicateMapping,
    form: &HashMap<String, String>,
) -> DuplicateMapping {
    candidates
        .iter()
        .filter_map(|(&primary, aliases)| {
            let confirmed: Vec<UserId> = aliases
                .iter()
                .copied()
                .filter(|&alias| {
                    form.get(&pair_key(primary, alias))
                        .map_or(false, |v| v == "yes")
                })
                .collect();
            (!confirmed.is_empty()).then(|| (primary, confirmed))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Detected,
    Presented,
    ConfirmedSubset,
    Merged,
}

/// A stored duplicate detection, addressed by its token between the
/// request that shows candidates and the one that confirms them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateReview {
    pub token: Uuid,
    pub state: ReviewState,
    pub candidates: DuplicateMapping,
    pub confirmed: DuplicateMapping,
    pub expires_at: DateTime<Utc>,
}

impl DuplicateReview {
    pub fn detect(candidates: DuplicateMapping, ttl: Duration) -> Self {
        Self {
            token: Uuid::new_v4(),
            state: ReviewState::Detected,
            candidates,
            confirmed: DuplicateMapping::new(),
            expires_at: Utc::now() + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn present(&mut self) -> Result<(), Error> {
        self.transition(ReviewState::Detected, ReviewState::Presented)
    }

    /// Records which pairs the administrator selected. A review whose merge
    /// failed may be confirmed again.
    pub fn confirm(&mut self, form: &HashMap<String, String>) -> Result<&DuplicateMapping, Error> {
        if self.state == ReviewState::ConfirmedSubset {
            self.state = ReviewState::Presented;
        }
        self.transition(ReviewState::Presented, ReviewState::ConfirmedSubset)?;
        self.confirmed = confirmed_subset(&self.candidates, form);
        Ok(&self.confirmed)
    }

    pub fn merged(&mut self) -> Result<(), Error> {
        self.transition(ReviewState::ConfirmedSubset, ReviewState::Merged)
    }

    fn transition(&mut self, from: ReviewState, to: ReviewState) -> Result<(), Error> {
        if self.state != from {
            return Err(Error::InvalidPayload {
                message: format!(
                    "Duplicate review is {:?}, expected {:?}",
                    self.state, from
                ),
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Outcome of merging the aliases of one primary.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub primary: UserId,
    pub aliases: Vec<UserId>,
    pub merged: bool,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::user;

    #[test]
    fn same_email_or_same_name_are_duplicates() {
        let users = vec![
            user(4, "Anna", "Muster", "anna@example.com"),
            user(2, "anna ", "MUSTER", "a.muster@example.com"),
            user(9, "Ann", "Other", " Anna@Example.com"),
            user(5, "Bob", "Builder", "bob@example.com"),
        ];
        let mapping = find_duplicate_users(&users);
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping[&2], vec![4, 9]);
    }

    #[test]
    fn empty_fields_never_match() {
        let users = vec![user(1, "", "", ""), user(2, "", "", "")];
        assert!(find_duplicate_users(&users).is_empty());
    }

    #[test]
    fn only_flagged_pairs_are_confirmed() {
        let mut candidates = DuplicateMapping::new();
        candidates.insert(1, vec![2, 3]);
        candidates.insert(10, vec![11]);
        let form: HashMap<String, String> = [
            ("post", "yes"),
            ("1-3", "yes"),
            ("1-2", "no"),
            ("10-12", "yes"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let confirmed = confirmed_subset(&candidates, &form);
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[&1], vec![3]);
    }

    #[test]
    fn review_walks_through_its_states() {
        let mut candidates = DuplicateMapping::new();
        candidates.insert(1, vec![2]);
        let mut review = DuplicateReview::detect(candidates, Duration::minutes(5));
        assert!(review.merged().is_err());

        review.present().unwrap();
        let form: HashMap<String, String> =
            [("1-2".to_string(), "yes".to_string())].into_iter().collect();
        assert_eq!(review.confirm(&form).unwrap()[&1], vec![2]);
        // retry after a failed merge
        review.confirm(&form).unwrap();
        review.merged().unwrap();
        assert_eq!(review.state, ReviewState::Merged);
        assert!(review.confirm(&form).is_err());
    }

    #[test]
    fn review_survives_storage() {
        let mut candidates = DuplicateMapping::new();
        candidates.insert(7, vec![8, 9]);
        let mut review = DuplicateReview::detect(candidates, Duration::minutes(5));
        review.present().unwrap();

        let restored = DuplicateReview::decode(&review.encode().unwrap()).unwrap();
        assert_eq!(restored.token, review.token);
        assert_eq!(restored.state, ReviewState::Presented);
        assert_eq!(restored.candidates[&7], vec![8, 9]);
        assert!(!restored.is_expired(Utc::now()));
    }
}
