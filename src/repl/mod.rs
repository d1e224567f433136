use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::cluster::{ClusterSimulator, ClusterSnapshot};
use crate::events::Subscription;
use crate::raft::NodeId;

const DEFAULT_STEP_MS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Step(u64),
    Run(u64),
    Status,
    Kill(NodeId),
    Revive(NodeId),
    Promote(NodeId),
    Expire(NodeId),
    Events,
    Help,
    Exit,
}

impl ReplCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or("").to_ascii_lowercase();
        let arg = parts.next();
        if parts.next().is_some() {
            return Err(format!("too many arguments for '{verb}'"));
        }

        let number = |what: &str| -> Result<u64, String> {
            let raw = arg.ok_or_else(|| format!("'{verb}' needs {what}"))?;
            raw.parse::<u64>()
                .map_err(|_| format!("'{raw}' is not a valid {what}"))
        };

        match verb.as_str() {
            "step" | "s" => match arg {
                Some(_) => Ok(ReplCommand::Step(number("duration in ms")?)),
                None => Ok(ReplCommand::Step(DEFAULT_STEP_MS)),
            },
            "run" => Ok(ReplCommand::Run(number("duration in ms")?)),
            "status" | "st" => Ok(ReplCommand::Status),
            "kill" => Ok(ReplCommand::Kill(number("node id")?)),
            "revive" => Ok(ReplCommand::Revive(number("node id")?)),
            "promote" => Ok(ReplCommand::Promote(number("node id")?)),
            "expire" => Ok(ReplCommand::Expire(number("node id")?)),
            "events" => Ok(ReplCommand::Events),
            "help" | "?" => Ok(ReplCommand::Help),
            "exit" | "quit" => Ok(ReplCommand::Exit),
            other => Err(format!("unknown command '{other}', try 'help'")),
        }
    }
}

/// Interactive driver for a deterministic simulator.
pub struct Repl {
    sim: ClusterSimulator,
    events: Subscription,
    rl: DefaultEditor,
}

impl Repl {
    pub fn new(sim: ClusterSimulator) -> Result<Self, ReadlineError> {
        let events = sim.subscribe();
        Ok(Self {
            sim,
            events,
            rl: DefaultEditor::new()?,
        })
    }

    pub fn run(&mut self) {
        println!("Raft election simulator ({} nodes)", self.sim.node_count());
        println!("Type 'help' for commands or 'exit' to quit");

        loop {
            let prompt = format!("raftsim@{}ms> ", self.sim.now());
            match self.rl.readline(&prompt) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let _ = self.rl.add_history_entry(line.as_str());

                    match ReplCommand::parse(&line) {
                        Ok(ReplCommand::Exit) => {
                            println!("Goodbye!");
                            break;
                        }
                        Ok(command) => self.execute(command),
                        Err(e) => eprintln!("Error: {e}"),
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    println!("Goodbye!");
                    break;
                }
                Err(e) => {
                    eprintln!("Error: {e:?}");
                    break;
                }
            }
        }
    }

    fn execute(&mut self, command: ReplCommand) {
        let result = match command {
            ReplCommand::Step(ms) => {
                self.sim.step(ms);
                Ok(())
            }
            ReplCommand::Run(ms) => {
                self.sim.run_for(ms, DEFAULT_STEP_MS);
                Ok(())
            }
            ReplCommand::Kill(id) => self.sim.set_reachable(id, false),
            ReplCommand::Revive(id) => self.sim.set_reachable(id, true),
            ReplCommand::Promote(id) => self.sim.force_promote(id),
            ReplCommand::Expire(id) => self.sim.expire_election_timer(id),
            ReplCommand::Events => {
                self.print_events();
                return;
            }
            ReplCommand::Help => {
                print_help();
                return;
            }
            ReplCommand::Status | ReplCommand::Exit => Ok(()),
        };

        match result {
            Ok(()) => print_snapshot(&self.sim.snapshot()),
            Err(e) => eprintln!("Error: {e}"),
        }
    }

    fn print_events(&mut self) {
        let events = self.events.drain();
        if self.events.missed() > 0 {
            println!("({} older events were dropped)", self.events.missed());
        }
        for event in events {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => eprintln!("Error encoding event: {e}"),
            }
        }
    }
}

fn print_snapshot(snapshot: &ClusterSnapshot) {
    let width = 12;
    println!(
        "{:width$}{:width$}{:width$}{:width$}{:width$}",
        "node", "role", "term", "leader", "reachable"
    );
    println!("{}", "-".repeat(width * 5));
    for (id, view) in &snapshot.nodes {
        let leader = view
            .leader_id
            .map(|l| l.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:width$}{:width$}{:width$}{:width$}{:width$}",
            id.to_string(),
            view.role.to_string(),
            view.term.to_string(),
            leader,
            view.is_reachable.to_string()
        );
    }
    match snapshot.leader_id {
        Some(id) => println!("leader: node {id}"),
        None => println!("leader: none"),
    }
}

fn print_help() {
    println!("step [ms]      advance the clock (default {DEFAULT_STEP_MS}ms)");
    println!("run <ms>       advance the clock in {DEFAULT_STEP_MS}ms steps");
    println!("status         show every node");
    println!("kill <id>      mark a node unreachable");
    println!("revive <id>    mark a node reachable again");
    println!("promote <id>   force a node to become leader");
    println!("expire <id>    make a node's election timer fire on the next step");
    println!("events         print events since the last call as JSON");
    println!("exit           quit");
}
