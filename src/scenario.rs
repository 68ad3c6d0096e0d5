//! Scenario context shared by every task of an experiment.
//!
//! The scenario strings are opaque: they describe the problem domain and are
//! rendered verbatim into generation prompts.

use serde::{Deserialize, Serialize};

/// Natural-language description of the problem the experiment works on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Background of the scenario.
    #[serde(default)]
    pub background: String,
    /// Interface the generated code must follow.
    #[serde(default)]
    pub interface: String,
    /// Expected output format of the generated code.
    #[serde(default)]
    pub output_format: String,
    /// How the user can exercise the generated code.
    #[serde(default)]
    pub simulator: String,
}

impl Scenario {
    pub fn new(background: impl Into<String>) -> Self {
        Self {
            background: background.into(),
            ..Default::default()
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    pub fn with_output_format(mut self, output_format: impl Into<String>) -> Self {
        self.output_format = output_format.into();
        self
    }

    pub fn with_simulator(mut self, simulator: impl Into<String>) -> Self {
        self.simulator = simulator.into();
        self
    }

    /// Full description used as the experiment's shared prompt context.
    ///
    /// Empty sections are omitted.
    pub fn full_description(&self) -> String {
        let sections = [
            ("Background of the scenario:", &self.background),
            (
                "The interface you should follow to write the runnable code:",
                &self.interface,
            ),
            ("The output of your code should be in the format:", &self.output_format),
            ("The simulator user can use to test your code:", &self.simulator),
        ];

        let mut out = String::new();
        for (title, body) in sections {
            if body.trim().is_empty() {
                continue;
            }
            out.push_str(title);
            out.push('\n');
            out.push_str(body.trim_end());
            out.push('\n');
        }
        out
    }
}
