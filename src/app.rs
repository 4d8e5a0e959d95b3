use crate::scenario::{
    Replay,
    Scenario,
};
use call_simulator_config::Config;
use color_eyre::Result;
use eyre::Context as _;
use std::path::Path;

pub struct App {
    config: Config,
    scenario: Scenario,
}

impl App {
    pub fn new(config: Config, scenario: &Path) -> Result<Self> {
        let scenario = Scenario::from_path(scenario).wrap_err("Failed to load scenario")?;
        debug!(
            participants = scenario.participants.len(),
            steps = scenario.steps.len(),
            local = scenario.local.is_some(),
            "scenario loaded"
        );
        Ok(Self { config, scenario })
    }

    pub fn run(self) -> Result<()> {
        let replay = Replay::new(&self.config, &self.scenario);
        let outcome = replay.run(&self.scenario.steps);
        let summary = replay.summary();
        replay.finish();
        outcome.wrap_err("Scenario replay aborted")?;

        let summary = serde_yml::to_string(&summary).context("Failed to serialize summary")?;
        println!("{summary}");
        Ok(())
    }
}
