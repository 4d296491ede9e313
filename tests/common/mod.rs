//! Shared test doubles: a scripted runtime and a fixed management probe.

#![allow(dead_code)]

use kodegen_cluster_deploy::health::{EndpointStatus, ManagementProbe};
use kodegen_cluster_deploy::runtime::{
    CapabilityMatrix, CommandOutput, ComposeImplKind, ExecError, Invocation, ProcessRunner,
    RuntimeKind,
};
use kodegen_cluster_deploy::topology::{SizeClass, TopologySpec};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Mutex;

pub const PASSWORD: &str = "Corr3ct-Horse-Battery";

type Respond = Box<dyn Fn(&Invocation) -> CommandOutput + Send + Sync>;

enum Reply {
    /// Served in order; the last one repeats
    Queue(Mutex<VecDeque<CommandOutput>>),
    Call(Respond),
}

struct Rule {
    needles: Vec<String>,
    reply: Reply,
}

/// Runner answering invocations from rules matched on the rendered command line.
///
/// Later rules win. Unmatched invocations succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    programs: BTreeMap<String, PathBuf>,
    rules: Vec<Rule>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, name: &str, path: &str) -> Self {
        self.programs.insert(name.to_string(), PathBuf::from(path));
        self
    }

    /// Replies `output` to every invocation containing all `needles`.
    pub fn on(self, needles: &[&str], output: CommandOutput) -> Self {
        self.on_sequence(needles, vec![output])
    }

    pub fn on_sequence(mut self, needles: &[&str], outputs: Vec<CommandOutput>) -> Self {
        self.rules.push(Rule {
            needles: needles.iter().map(|n| n.to_string()).collect(),
            reply: Reply::Queue(Mutex::new(outputs.into())),
        });
        self
    }

    /// Replies through `respond`, which may create files the real runtime would.
    pub fn on_call(
        mut self,
        needles: &[&str],
        respond: impl Fn(&Invocation) -> CommandOutput + Send + Sync + 'static,
    ) -> Self {
        self.rules.push(Rule {
            needles: needles.iter().map(|n| n.to_string()).collect(),
            reply: Reply::Call(Box::new(respond)),
        });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Invocations containing every needle.
    pub fn count(&self, needles: &[&str]) -> usize {
        self.calls()
            .iter()
            .filter(|line| needles.iter().all(|n| line.contains(n)))
            .count()
    }

    fn respond(&self, invocation: &Invocation) -> CommandOutput {
        let line = invocation.display();
        self.calls.lock().unwrap().push(line.clone());

        let rule = self
            .rules
            .iter()
            .rev()
            .find(|rule| rule.needles.iter().all(|n| line.contains(n.as_str())));
        match rule.map(|r| &r.reply) {
            None => CommandOutput::ok(""),
            Some(Reply::Call(respond)) => respond(invocation),
            Some(Reply::Queue(queue)) => {
                let mut queue = queue.lock().unwrap();
                if queue.len() > 1 {
                    queue.pop_front().unwrap()
                } else {
                    queue.front().cloned().unwrap_or_else(|| CommandOutput::ok(""))
                }
            }
        }
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(
        &self,
        invocation: &Invocation,
    ) -> impl Future<Output = Result<CommandOutput, ExecError>> + Send {
        let output = self.respond(invocation);
        async move { Ok(output) }
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        self.programs.get(program).cloned()
    }
}

/// Management probe with a fixed answer.
pub struct FixedProbe(pub EndpointStatus);

impl FixedProbe {
    pub fn answering() -> Self {
        FixedProbe(EndpointStatus::Answering { status: 200 })
    }
}

impl ManagementProbe for FixedProbe {
    fn check(&self, _port: u16) -> impl Future<Output = EndpointStatus> + Send {
        let status = self.0.clone();
        async move { status }
    }
}

/// Podman with native compose, secrets and healthchecks; no profiles.
pub fn podman_caps() -> CapabilityMatrix {
    let mut caps = CapabilityMatrix::baseline(
        RuntimeKind::Podman,
        ComposeImplKind::Native,
        "/usr/bin/podman",
        "/usr/bin/podman",
    );
    caps.supports_secrets = true;
    caps.supports_healthcheck = true;
    caps
}

/// Every service has a running, healthy container.
pub fn healthy_stack() -> ScriptedRunner {
    ScriptedRunner::new()
        .on(&["ps -q"], CommandOutput::ok("c0ffee\n"))
        .on(&["inspect --format"], CommandOutput::ok("running|healthy\n"))
}

pub fn spec(class: SizeClass) -> TopologySpec {
    TopologySpec::for_class(class)
}
