//! JSON scenarios replayed against the simulated backend.
//!
//! Nodes are referred to by names chosen in the scenario file; `root` is
//! always bound to the root submix.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use voicegraph_core::{
    EffectKind, EffectParameters, FilterParameters, GraphConfig, GraphSnapshot, Handle,
    HandleKind, LoopRegion, Result, SimulatedBackend, VoiceGraph, VoiceGraphError, WavDecoder,
};

pub const ROOT_NAME: &str = "root";

fn unit_volume() -> f32 {
    1.0
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Load {
        path: PathBuf,
        key: String,
    },
    Unload {
        key: String,
    },
    CreateSubmix {
        name: String,
        #[serde(default)]
        outputs: Vec<String>,
    },
    Play {
        name: String,
        key: String,
        #[serde(default = "unit_volume")]
        volume: f32,
    },
    PlayLoop {
        name: String,
        key: String,
        region: LoopRegion,
        #[serde(default = "unit_volume")]
        volume: f32,
    },
    Connect {
        from: String,
        to: String,
    },
    Disconnect {
        from: String,
        to: String,
    },
    Delete {
        name: String,
    },
    Stop {
        name: String,
    },
    Resume {
        name: String,
    },
    PlayAgain {
        name: String,
        #[serde(default)]
        begin: Option<f32>,
        #[serde(default)]
        length: Option<f32>,
    },
    StopAll {
        #[serde(default)]
        destroy: bool,
    },
    ResumeAll,
    SetVolume {
        name: String,
        volume: f32,
    },
    SetFilter {
        name: String,
        filter: FilterParameters,
    },
    AddEffect {
        submix: String,
        effect: EffectKind,
        #[serde(default = "enabled")]
        active: bool,
        #[serde(default)]
        position: Option<usize>,
    },
    SetEffect {
        submix: String,
        #[serde(default)]
        index: Option<usize>,
        parameters: EffectParameters,
    },
    Tick {
        frames: u64,
    },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Load { key, .. } => write!(f, "load `{key}`"),
            Step::Unload { key } => write!(f, "unload `{key}`"),
            Step::CreateSubmix { name, .. } => write!(f, "create_submix `{name}`"),
            Step::Play { name, .. } => write!(f, "play `{name}`"),
            Step::PlayLoop { name, .. } => write!(f, "play_loop `{name}`"),
            Step::Connect { from, to } => write!(f, "connect `{from}` -> `{to}`"),
            Step::Disconnect { from, to } => write!(f, "disconnect `{from}` -> `{to}`"),
            Step::Delete { name } => write!(f, "delete `{name}`"),
            Step::Stop { name } => write!(f, "stop `{name}`"),
            Step::Resume { name } => write!(f, "resume `{name}`"),
            Step::PlayAgain { name, .. } => write!(f, "play_again `{name}`"),
            Step::StopAll { .. } => f.write_str("stop_all"),
            Step::ResumeAll => f.write_str("resume_all"),
            Step::SetVolume { name, .. } => write!(f, "set_volume `{name}`"),
            Step::SetFilter { name, .. } => write!(f, "set_filter `{name}`"),
            Step::AddEffect { submix, effect, .. } => write!(f, "add {effect} to `{submix}`"),
            Step::SetEffect { submix, .. } => write!(f, "set_effect on `{submix}`"),
            Step::Tick { frames } => write!(f, "tick {frames}"),
        }
    }
}

/// Result of a scenario run, printed as JSON by the CLI.
#[derive(Debug, Serialize)]
pub struct Report {
    pub names: BTreeMap<String, Handle>,
    /// Names of sources that finished during `tick` steps, in order.
    pub finished: Vec<String>,
    pub graph: GraphSnapshot,
}

pub struct Runner {
    graph: VoiceGraph<SimulatedBackend, WavDecoder>,
    names: HashMap<String, Handle>,
    finished: Vec<String>,
    base_dir: PathBuf,
}

impl Runner {
    /// `base_dir` resolves relative sample paths.
    pub fn new(config: GraphConfig, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let graph = VoiceGraph::new(SimulatedBackend::new(), WavDecoder::new(), config)?;
        let mut names = HashMap::new();
        names.insert(ROOT_NAME.to_string(), graph.root());
        Ok(Self {
            graph,
            names,
            finished: Vec::new(),
            base_dir: base_dir.into(),
        })
    }

    /// Runs every step, stopping at the first failure.
    pub fn run(mut self, scenario: &Scenario) -> Result<Report> {
        for (index, step) in scenario.steps.iter().enumerate() {
            tracing::debug!(index, %step, "running step");
            self.step(step).map_err(|err| {
                VoiceGraphError::msg(format!("step {index} ({step}) failed: {err}"))
            })?;
        }
        self.graph.check_invariants()?;
        Ok(self.report())
    }

    fn report(&self) -> Report {
        Report {
            names: self
                .names
                .iter()
                .filter(|(_, handle)| self.graph.contains(**handle))
                .map(|(name, handle)| (name.clone(), *handle))
                .collect(),
            finished: self.finished.clone(),
            graph: self.graph.snapshot(),
        }
    }

    fn step(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::Load { path, key } => {
                let path = self.base_dir.join(path);
                self.graph.load_sound(path, key)
            }
            Step::Unload { key } => {
                if !self.graph.unload_sound(key) {
                    tracing::warn!(key = %key, "sound was not loaded");
                }
                Ok(())
            }
            Step::CreateSubmix { name, outputs } => {
                self.ensure_unbound(name)?;
                let outputs = outputs
                    .iter()
                    .map(|output| self.resolve(output))
                    .collect::<Result<Vec<_>>>()?;
                let handle = self.graph.create_submix(&outputs)?;
                self.bind(name, handle)
            }
            Step::Play { name, key, volume } => {
                self.ensure_unbound(name)?;
                let handle = self.graph.play(key, *volume)?;
                self.bind(name, handle)
            }
            Step::PlayLoop {
                name,
                key,
                region,
                volume,
            } => {
                self.ensure_unbound(name)?;
                let handle = self.graph.play_loop(key, *region, *volume)?;
                self.bind(name, handle)
            }
            Step::Connect { from, to } => {
                let (from, to) = (self.resolve(from)?, self.resolve(to)?);
                match from.kind() {
                    Some(HandleKind::Source) => self.graph.connect_source(from, to),
                    _ => self.graph.connect_submix(from, to),
                }
            }
            Step::Disconnect { from, to } => {
                let (from, to) = (self.resolve(from)?, self.resolve(to)?);
                match from.kind() {
                    Some(HandleKind::Source) => self.graph.disconnect_source(from, to),
                    _ => self.graph.disconnect_submix(from, to),
                }
            }
            Step::Delete { name } => {
                let handle = self.resolve(name)?;
                if !self.graph.delete_node(handle) {
                    return Err(VoiceGraphError::msg(format!("`{name}` cannot be deleted")));
                }
                self.names.remove(name);
                Ok(())
            }
            Step::Stop { name } => {
                let handle = self.resolve(name)?;
                self.graph.stop(handle)
            }
            Step::Resume { name } => {
                let handle = self.resolve(name)?;
                self.graph.resume(handle)
            }
            Step::PlayAgain {
                name,
                begin,
                length,
            } => {
                let handle = self.resolve(name)?;
                match (begin, length) {
                    (None, None) => self.graph.play_again(handle),
                    (begin, length) => self.graph.play_again_range(
                        handle,
                        begin.unwrap_or(0.0),
                        length.unwrap_or(0.0),
                    ),
                }
            }
            Step::StopAll { destroy } => {
                self.graph.stop_all(*destroy);
                Ok(())
            }
            Step::ResumeAll => {
                self.graph.resume_all();
                Ok(())
            }
            Step::SetVolume { name, volume } => {
                let handle = self.resolve(name)?;
                self.graph.set_volume(handle, *volume)
            }
            Step::SetFilter { name, filter } => {
                let handle = self.resolve(name)?;
                self.graph.set_filter(handle, *filter)
            }
            Step::AddEffect {
                submix,
                effect,
                active,
                position,
            } => {
                let handle = self.resolve(submix)?;
                self.graph
                    .add_effect(handle, *effect, *active, *position)
                    .map(|_| ())
            }
            Step::SetEffect {
                submix,
                index,
                parameters,
            } => {
                let handle = self.resolve(submix)?;
                self.graph
                    .set_effect_parameters(handle, *index, parameters.clone())
            }
            Step::Tick { frames } => {
                self.graph.backend_mut().advance(*frames);
                for handle in self.graph.update() {
                    if let Some(name) = self.name_of(handle) {
                        self.finished.push(name);
                    }
                }
                Ok(())
            }
        }
    }

    fn resolve(&self, name: &str) -> Result<Handle> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| VoiceGraphError::msg(format!("unknown node name `{name}`")))
    }

    fn ensure_unbound(&self, name: &str) -> Result<()> {
        match self.names.get(name) {
            Some(&bound) if self.graph.contains(bound) => Err(VoiceGraphError::msg(format!(
                "name `{name}` is already in use"
            ))),
            _ => Ok(()),
        }
    }

    fn bind(&mut self, name: &str, handle: Handle) -> Result<()> {
        self.names.insert(name.to_string(), handle);
        Ok(())
    }

    fn name_of(&self, handle: Handle) -> Option<String> {
        self.names
            .iter()
            .find(|(_, bound)| **bound == handle)
            .map(|(name, _)| name.clone())
    }
}
