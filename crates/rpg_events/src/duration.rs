//! How long a modifier or condition lasts.
//!
//! A [`Duration`] carries whatever state decides its expiry. Round and clock
//! based durations compare against the current round and the in-game time
//! elapsed since they started. Trigger based durations (rests, concentration,
//! damage, saves) flip a flag when the triggering occurrence happens.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration as Elapsed;

/// The family a [`Duration`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationType {
    Permanent,
    Rounds,
    Minutes,
    Hours,
    Encounter,
    Concentration,
    ShortRest,
    LongRest,
    UntilDamaged,
    UntilSave,
}

impl DurationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DurationType::Permanent => "permanent",
            DurationType::Rounds => "rounds",
            DurationType::Minutes => "minutes",
            DurationType::Hours => "hours",
            DurationType::Encounter => "encounter",
            DurationType::Concentration => "concentration",
            DurationType::ShortRest => "short_rest",
            DurationType::LongRest => "long_rest",
            DurationType::UntilDamaged => "until_damaged",
            DurationType::UntilSave => "until_save",
        }
    }
}

impl fmt::Display for DurationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifetime for a modifier or condition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Duration {
    /// Never expires.
    #[default]
    Permanent,
    /// Expires once more than `rounds` rounds have passed since `start_round`.
    /// With `include_start` the starting round counts as the first.
    Rounds {
        rounds: u32,
        start_round: u32,
        include_start: bool,
    },
    /// Expires once `minutes` of in-game time have elapsed.
    Minutes { minutes: u32 },
    Hours { hours: u32 },
    /// Lasts while the encounter is active.
    Encounter { active: bool },
    Concentration { broken: bool },
    ShortRest { taken: bool },
    LongRest { taken: bool },
    UntilDamaged { damaged: bool },
    UntilSave {
        ability: CompactString,
        dc: i32,
        save_made: bool,
        /// The save is rolled at the end of the turn rather than the start.
        end_of_turn: bool,
    },
}

impl Duration {
    /// A round-based duration where the starting round counts as round one.
    pub fn rounds(rounds: u32, start_round: u32) -> Self {
        Duration::Rounds {
            rounds,
            start_round,
            include_start: true,
        }
    }

    pub fn until_save(ability: &str, dc: i32, end_of_turn: bool) -> Self {
        Duration::UntilSave {
            ability: CompactString::new(ability),
            dc,
            save_made: false,
            end_of_turn,
        }
    }

    pub fn duration_type(&self) -> DurationType {
        match self {
            Duration::Permanent => DurationType::Permanent,
            Duration::Rounds { .. } => DurationType::Rounds,
            Duration::Minutes { .. } => DurationType::Minutes,
            Duration::Hours { .. } => DurationType::Hours,
            Duration::Encounter { .. } => DurationType::Encounter,
            Duration::Concentration { .. } => DurationType::Concentration,
            Duration::ShortRest { .. } => DurationType::ShortRest,
            Duration::LongRest { .. } => DurationType::LongRest,
            Duration::UntilDamaged { .. } => DurationType::UntilDamaged,
            Duration::UntilSave { .. } => DurationType::UntilSave,
        }
    }

    /// Whether the duration has run out at `current_round`, with `elapsed`
    /// in-game time since it started.
    pub fn is_expired(&self, current_round: u32, elapsed: Elapsed) -> bool {
        match self {
            Duration::Permanent => false,
            Duration::Rounds {
                rounds,
                start_round,
                include_start,
            } => {
                let mut passed = i64::from(current_round) - i64::from(*start_round);
                if *include_start {
                    passed += 1;
                }
                passed > i64::from(*rounds)
            }
            Duration::Minutes { minutes } => elapsed.as_secs() >= u64::from(*minutes) * 60,
            Duration::Hours { hours } => elapsed.as_secs() >= u64::from(*hours) * 3600,
            Duration::Encounter { active } => !active,
            Duration::Concentration { broken } => *broken,
            Duration::ShortRest { taken } | Duration::LongRest { taken } => *taken,
            Duration::UntilDamaged { damaged } => *damaged,
            Duration::UntilSave { save_made, .. } => *save_made,
        }
    }

    /// Human-readable form, e.g. `3 rounds` or `Until wisdom save (DC 13) at end of turn`.
    pub fn description(&self) -> String {
        match self {
            Duration::Permanent => "Permanent".to_string(),
            Duration::Rounds { rounds: 1, .. } => "1 round".to_string(),
            Duration::Rounds { rounds, .. } => format!("{} rounds", rounds),
            Duration::Minutes { minutes: 1 } => "1 minute".to_string(),
            Duration::Minutes { minutes } => format!("{} minutes", minutes),
            Duration::Hours { hours: 1 } => "1 hour".to_string(),
            Duration::Hours { hours } => format!("{} hours", hours),
            Duration::Encounter { .. } => "Until end of encounter".to_string(),
            Duration::Concentration { .. } => "Concentration".to_string(),
            Duration::ShortRest { .. } => "Until short rest".to_string(),
            Duration::LongRest { .. } => "Until long rest".to_string(),
            Duration::UntilDamaged { .. } => "Until damaged".to_string(),
            Duration::UntilSave {
                ability,
                dc,
                end_of_turn,
                ..
            } => format!(
                "Until {} save (DC {}) at {} of turn",
                ability,
                dc,
                if *end_of_turn { "end" } else { "start" }
            ),
        }
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}
