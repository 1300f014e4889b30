//! Deterministic mood selection and transition guards.
//!
//! Mood is the orchestrator's policy state: it steers how aggressive the
//! verifier plan is. Both functions here are pure and total over
//! [`MoodSignals`]; identical inputs always produce the same mood.

use serde::{Deserialize, Serialize};

/// The eight orchestrator moods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mood {
    Calm,
    Curious,
    Skeptical,
    Paranoid,
    Bold,
    Petty,
    Contrite,
    Deferential,
}

impl Mood {
    /// Wire form, upper-case.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Calm => "CALM",
            Mood::Curious => "CURIOUS",
            Mood::Skeptical => "SKEPTICAL",
            Mood::Paranoid => "PARANOID",
            Mood::Bold => "BOLD",
            Mood::Petty => "PETTY",
            Mood::Contrite => "CONTRITE",
            Mood::Deferential => "DEFERENTIAL",
        }
    }
}

impl std::fmt::Display for Mood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mood {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CALM" => Ok(Mood::Calm),
            "CURIOUS" => Ok(Mood::Curious),
            "SKEPTICAL" => Ok(Mood::Skeptical),
            "PARANOID" => Ok(Mood::Paranoid),
            "BOLD" => Ok(Mood::Bold),
            "PETTY" => Ok(Mood::Petty),
            "CONTRITE" => Ok(Mood::Contrite),
            "DEFERENTIAL" => Ok(Mood::Deferential),
            other => Err(format!("unknown mood '{other}'")),
        }
    }
}

/// Signal record the mood functions operate on.
///
/// Defaults describe an unremarkable healthy run: a demo exists, conjectures
/// exist, state is consistent, nothing has crashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoodSignals {
    pub crash_detected: bool,
    pub has_demo: bool,
    pub conjectures_present: bool,
    pub repeated_verifier_failures: bool,
    pub about_to_cross_privilege_boundary: bool,
    pub preference_missing: bool,
    pub ambiguity_blocking: bool,
    pub user_idk: bool,
    pub verifiers_regress: bool,
    pub hyperthesis_high: bool,
    pub mitigations_installed: bool,
    pub verified_and_bounded: bool,
    pub suspected_reward_hack: bool,
    pub state_consistent: bool,
    pub previous_mood: Option<Mood>,
}

impl Default for MoodSignals {
    fn default() -> Self {
        Self {
            crash_detected: false,
            has_demo: true,
            conjectures_present: true,
            repeated_verifier_failures: false,
            about_to_cross_privilege_boundary: false,
            preference_missing: false,
            ambiguity_blocking: false,
            user_idk: false,
            verifiers_regress: false,
            hyperthesis_high: false,
            mitigations_installed: false,
            verified_and_bounded: false,
            suspected_reward_hack: false,
            state_consistent: true,
            previous_mood: None,
        }
    }
}

/// Select the mood for a fresh run. First matching rule wins.
pub fn select_initial_mood(signals: &MoodSignals) -> Mood {
    if signals.crash_detected {
        return Mood::Contrite;
    }
    if !signals.has_demo || !signals.conjectures_present {
        return Mood::Curious;
    }
    if signals.repeated_verifier_failures {
        return Mood::Skeptical;
    }
    if signals.about_to_cross_privilege_boundary {
        return if signals.preference_missing {
            Mood::Deferential
        } else {
            Mood::Paranoid
        };
    }
    Mood::Calm
}

/// Transition from `current` given fresh signals.
///
/// Preemptions (crash, reward hack, missing preference) apply regardless of
/// the current mood; otherwise each mood has its own exit guards and
/// everything else stays put.
pub fn transition_mood(current: Mood, signals: &MoodSignals) -> Mood {
    if signals.crash_detected {
        return Mood::Contrite;
    }
    if signals.suspected_reward_hack {
        return Mood::Petty;
    }
    if signals.preference_missing {
        return Mood::Deferential;
    }

    match current {
        Mood::Calm => {
            if signals.ambiguity_blocking || signals.user_idk {
                return Mood::Curious;
            }
            if signals.verifiers_regress {
                return Mood::Skeptical;
            }
        }
        Mood::Skeptical => {
            if signals.hyperthesis_high {
                return Mood::Paranoid;
            }
            if signals.verified_and_bounded {
                return Mood::Calm;
            }
        }
        Mood::Paranoid => {
            if signals.mitigations_installed {
                return Mood::Bold;
            }
        }
        Mood::Contrite => {
            if signals.state_consistent {
                return signals.previous_mood.unwrap_or(Mood::Calm);
            }
            return Mood::Contrite;
        }
        _ => {}
    }

    current
}
