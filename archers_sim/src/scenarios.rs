//! Fault scenarios for the archer line.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Nominal run: every archer fires once, with its own position
    Volley,

    /// A line of one: the head fires on its own message
    LoneArcher,

    /// A corrupted link on the return trip silences everyone past it
    BrokenLink,

    /// A link that drops everything: nobody fires
    LostArrow,

    /// A partition during construction aborts the build
    SplitLine,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Volley,
            ScenarioId::LoneArcher,
            ScenarioId::BrokenLink,
            ScenarioId::LostArrow,
            ScenarioId::SplitLine,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Volley => "volley",
            ScenarioId::LoneArcher => "lone_archer",
            ScenarioId::BrokenLink => "broken_link",
            ScenarioId::LostArrow => "lost_arrow",
            ScenarioId::SplitLine => "split_line",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Volley => "N archers, no faults: N fires, archer i fires with value i",
            ScenarioId::LoneArcher => "1 archer: fires immediately on start with value 1",
            ScenarioId::BrokenLink => "Garbled message into archer k on the way back: only k+1..N fire",
            ScenarioId::LostArrow => "Every stream into the tail dropped: no fires at all",
            ScenarioId::SplitLine => "Partition mid-line before construction: build fails at that hop",
        }
    }

    /// Smallest line the scenario makes sense for.
    pub fn min_archers(&self) -> usize {
        match self {
            ScenarioId::Volley | ScenarioId::LoneArcher => 1,
            ScenarioId::LostArrow | ScenarioId::SplitLine => 2,
            ScenarioId::BrokenLink => 3,
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "volley" => Ok(ScenarioId::Volley),
            "lone_archer" | "lonearcher" | "lone" => Ok(ScenarioId::LoneArcher),
            "broken_link" | "brokenlink" => Ok(ScenarioId::BrokenLink),
            "lost_arrow" | "lostarrow" => Ok(ScenarioId::LostArrow),
            "split_line" | "splitline" => Ok(ScenarioId::SplitLine),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>().unwrap(), scenario);
        }
        assert!("stampede".parse::<ScenarioId>().is_err());
    }
}
