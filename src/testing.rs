//! Solver doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::SolverError;
use crate::lp::{LinearModel, Sense};
use crate::neos::SolverService;

/// CPLEX-style listing with the given variables at 1.
pub fn listing(objective: f64, set: &[&str]) -> String {
    let mut text = format!(
        "MIP - Integer optimal solution:  Objective =  {:.10e}\n\
         Solution time =    0.01 sec.  Iterations = 3  Nodes = 0\n\n\
         Variable Name           Solution Value\n",
        objective
    );
    for var in set {
        text.push_str(&format!("{:<24}{:>14}\n", var, "1.000000"));
    }
    text.push_str("All other variables are 0.\n");
    text
}

/// Solves tiny models by trying every 0/1 vector.
#[derive(Default)]
pub struct ExhaustiveSolver {
    calls: AtomicUsize,
}

impl ExhaustiveSolver {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SolverService for ExhaustiveSolver {
    async fn solve(&self, model: &LinearModel) -> Result<String, SolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let vars = model.binaries();
        assert!(vars.len() <= 20, "model too large to enumerate");
        let index: HashMap<&str, usize> = vars
            .iter()
            .enumerate()
            .map(|(i, v)| (v.as_str(), i))
            .collect();

        let mut best: Option<(f64, u32)> = None;
        for mask in 0u32..(1u32 << vars.len()) {
            let value = |var: &str| match index.get(var) {
                Some(i) if mask & (1u32 << *i) != 0 => 1.0,
                _ => 0.0,
            };
            if !model.violated_constraints(value, 1e-9).is_empty() {
                continue;
            }
            let objective = model.objective_value(value);
            let better = match best {
                None => true,
                Some((current, _)) => match model.sense {
                    Sense::Minimize => objective < current - 1e-9,
                    Sense::Maximize => objective > current + 1e-9,
                },
            };
            if better {
                best = Some((objective, mask));
            }
        }

        Ok(match best {
            None => "MIP - Integer infeasible.\n".to_string(),
            Some((objective, mask)) => {
                let set: Vec<&str> = vars
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1u32 << *i) != 0)
                    .map(|(_, v)| v.as_str())
                    .collect();
                listing(objective, &set)
            }
        })
    }
}

/// Replays prepared listings in order and records each submitted model.
#[derive(Default)]
pub struct ScriptedSolver {
    listings: Mutex<VecDeque<String>>,
    pub models: Mutex<Vec<LinearModel>>,
}

impl ScriptedSolver {
    pub fn new(listings: Vec<String>) -> Self {
        Self {
            listings: Mutex::new(listings.into()),
            models: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.models.lock().unwrap().len()
    }
}

#[async_trait]
impl SolverService for ScriptedSolver {
    async fn solve(&self, model: &LinearModel) -> Result<String, SolverError> {
        self.models.lock().unwrap().push(model.clone());
        self.listings
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| SolverError::NoSolution("script exhausted".to_string()))
    }
}
