//! txscope - propagation demo
//!
//! Runs propagation scenarios against the in-memory backend and prints what
//! happened on the connections.

use std::process::ExitCode;

use serde_json::json;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use txscope::analyzer::PropagationAnalyzer;
use txscope::connection::ConnectionError;
use txscope::memory::{MemoryConnection, MemoryPool};
use txscope::transaction::{
    Classify, ContextStack, ErrorKind, Propagation, TransactionDefinition, TransactionError,
    TransactionManager, TransactionStatus,
};

const SCENARIOS: &[&str] = &["required", "requires-new", "nested", "rollback", "poison", "complex"];

#[derive(Debug, Error)]
enum DemoError {
    #[error("business rule failed: {0}")]
    Business(&'static str),
    #[error(transparent)]
    Store(#[from] ConnectionError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl Classify for DemoError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            DemoError::Business(_) => ErrorKind::unchecked("demo.business"),
            DemoError::Store(_) => ErrorKind::unchecked("demo.store"),
            DemoError::Transaction(err) => err.error_kind(),
        }
    }
}

type Manager = TransactionManager<MemoryPool>;
type Stack = ContextStack<MemoryConnection>;
type Status = TransactionStatus<MemoryConnection>;

struct Run<'a> {
    manager: &'a Manager,
    analyzer: &'a PropagationAnalyzer,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    // Parse simple command line args.
    let mut verbose = false;
    let mut json_output = false;
    let mut report = false;
    let mut selected: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-v" | "--verbose" => {
                verbose = true;
            }
            "--json" => {
                json_output = true;
            }
            "-r" | "--report" => {
                report = true;
            }
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("txscope v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            arg => {
                if SCENARIOS.contains(&arg) {
                    selected.push(arg.to_string());
                } else {
                    eprintln!("Unknown option or scenario: {}", arg);
                    return ExitCode::FAILURE;
                }
            }
        }
        i += 1;
    }

    init_tracing(verbose);

    if selected.is_empty() {
        selected = SCENARIOS.iter().map(|s| s.to_string()).collect();
    }

    let mut failed = false;
    for name in &selected {
        if let Err(e) = run_scenario(name, json_output, report) {
            eprintln!("Error in scenario {}: {}", name, e);
            failed = true;
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "txscope=debug" } else { "txscope=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_help() {
    println!("txscope - transaction propagation demo");
    println!();
    println!("Usage: txscope [OPTIONS] [SCENARIO]...");
    println!();
    println!("Options:");
    println!("  -v, --verbose          Enable debug logging (RUST_LOG overrides)");
    println!("  -r, --report           Print the propagation analyzer report");
    println!("  --json                 Print journal entries as JSON lines");
    println!("  -h, --help             Show this help message");
    println!("  --version              Show version");
    println!();
    println!("Scenarios (default: all):");
    println!("  required               Inner REQUIRED joins the outer transaction");
    println!("  requires-new           Failing REQUIRES_NEW inner leaves outer work intact");
    println!("  nested                 Failing NESTED inner rolls back to its mark only");
    println!("  rollback               Failing REQUIRED work rolls back everything");
    println!("  poison                 Failing REQUIRED inner dooms the outer commit");
    println!("  complex                REQUIRED -> REQUIRES_NEW -> NESTED");
}

fn run_scenario(
    name: &str,
    json_output: bool,
    report: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let pool = MemoryPool::new(4);
    let manager = TransactionManager::new(pool.clone());
    let analyzer = PropagationAnalyzer::new();
    let mut stack = ContextStack::new();
    let run = Run {
        manager: &manager,
        analyzer: &analyzer,
    };

    println!("=== {} ===", name);

    let (outcome, expected) = match name {
        "required" => (run.required(&mut stack), Propagation::Required),
        "requires-new" => (run.requires_new(&mut stack), Propagation::RequiresNew),
        "nested" => (run.nested(&mut stack), Propagation::Nested),
        "rollback" => (run.rollback(&mut stack), Propagation::Required),
        "poison" => (run.poison(&mut stack), Propagation::Required),
        "complex" => (run.complex(&mut stack), Propagation::Nested),
        other => return Err(format!("unknown scenario: {}", other).into()),
    };
    analyzer.capture(&stack, "after");

    match &outcome {
        Ok(()) => println!("outcome: ok"),
        Err(e) => println!("outcome: error: {}", e),
    }

    for entry in pool.journal().entries() {
        if json_output {
            println!("{}", serde_json::to_string(&entry)?);
        } else {
            println!("  {}", entry);
        }
    }

    let committed: Vec<String> = ["order", "audit", "payment", "log"]
        .into_iter()
        .filter(|key| pool.committed(key).is_some())
        .map(|key| key.to_string())
        .collect();
    println!("committed keys: [{}]", committed.join(", "));

    let check = analyzer.validate(expected);
    println!("pattern: {}", check);

    let stats = manager.stats();
    if json_output {
        println!("{}", serde_json::to_string(&stats)?);
    } else {
        println!(
            "stats: begun={} committed={} rolled_back={} joined={} nested={} partial_rollbacks={} poisoned={}",
            stats.begun,
            stats.committed,
            stats.rolled_back,
            stats.joined,
            stats.nested,
            stats.partial_rollbacks,
            stats.poisoned
        );
    }

    if report {
        print!("{}", analyzer.report());
    }
    println!();
    Ok(())
}

impl Run<'_> {
    fn scope<F>(
        &self,
        stack: &mut Stack,
        definition: TransactionDefinition,
        location: &str,
        work: F,
    ) -> Result<(), DemoError>
    where
        F: FnOnce(&mut Stack, &Status) -> Result<(), DemoError>,
    {
        self.manager.execute(stack, &definition, |stack, status| {
            self.analyzer.capture(&*stack, &format!("{} start", location));
            let result = work(stack, status);
            self.analyzer.capture(&*stack, &format!("{} end", location));
            result
        })
    }

    fn write(status: &Status, key: &str, value: serde_json::Value) -> Result<(), DemoError> {
        status.context().with_connection(|c| c.put(key, value))?;
        Ok(())
    }

    fn required(&self, stack: &mut Stack) -> Result<(), DemoError> {
        self.scope(stack, TransactionDefinition::required(), "outer", |stack, status| {
            Self::write(status, "order", json!({"id": 1}))?;
            self.scope(stack, TransactionDefinition::required(), "inner", |_, status| {
                Self::write(status, "payment", json!({"order": 1}))
            })
        })
    }

    fn requires_new(&self, stack: &mut Stack) -> Result<(), DemoError> {
        self.scope(stack, TransactionDefinition::required(), "outer", |stack, status| {
            Self::write(status, "order", json!({"id": 1}))?;
            let inner = self.scope(stack, TransactionDefinition::requires_new(), "inner", |_, status| {
                Self::write(status, "audit", json!("attempt"))?;
                Err(DemoError::Business("audit service rejected entry"))
            });
            if let Err(e) = inner {
                println!("inner failed, outer continues: {}", e);
            }
            Self::write(status, "log", json!("outer continued"))
        })
    }

    fn nested(&self, stack: &mut Stack) -> Result<(), DemoError> {
        self.scope(stack, TransactionDefinition::required(), "outer", |stack, status| {
            Self::write(status, "order", json!({"id": 1}))?;
            let inner = self.scope(stack, TransactionDefinition::nested(), "nested", |_, status| {
                Self::write(status, "payment", json!({"order": 1}))?;
                Err(DemoError::Business("card declined"))
            });
            if let Err(e) = inner {
                println!("nested scope rolled back to its mark: {}", e);
            }
            Self::write(status, "log", json!("outer continued"))
        })
    }

    fn rollback(&self, stack: &mut Stack) -> Result<(), DemoError> {
        self.scope(stack, TransactionDefinition::required(), "outer", |stack, status| {
            Self::write(status, "order", json!({"id": 1}))?;
            self.scope(stack, TransactionDefinition::required(), "inner", |_, status| {
                Self::write(status, "payment", json!({"order": 1}))?;
                Err(DemoError::Business("payment failed"))
            })
        })
    }

    fn poison(&self, stack: &mut Stack) -> Result<(), DemoError> {
        self.scope(stack, TransactionDefinition::required(), "outer", |stack, status| {
            Self::write(status, "order", json!({"id": 1}))?;
            let inner = self.scope(stack, TransactionDefinition::required(), "inner", |_, _| {
                Err(DemoError::Business("validation failed"))
            });
            if let Err(e) = inner {
                println!("inner failed and was swallowed: {}", e);
            }
            Ok(())
        })
    }

    fn complex(&self, stack: &mut Stack) -> Result<(), DemoError> {
        self.scope(stack, TransactionDefinition::required(), "outer", |stack, status| {
            Self::write(status, "order", json!({"id": 1}))?;
            self.scope(stack, TransactionDefinition::requires_new(), "independent", |stack, status| {
                Self::write(status, "audit", json!("order placed"))?;
                let nested = self.scope(stack, TransactionDefinition::nested(), "nested", |_, status| {
                    Self::write(status, "log", json!("detail"))?;
                    Err(DemoError::Business("detail logging failed"))
                });
                if let Err(e) = nested {
                    println!("nested scope rolled back to its mark: {}", e);
                }
                Ok(())
            })
        })
    }
}
