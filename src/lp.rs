//! 0/1 linear programs and their CPLEX LP rendering.

use std::fmt::Write as _;

const TERMS_PER_LINE: usize = 8;
const NAMES_PER_LINE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Minimize,
    Maximize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Eq,
    Le,
    Ge,
}

impl Relation {
    fn symbol(self) -> &'static str {
        match self {
            Relation::Eq => "=",
            Relation::Le => "<=",
            Relation::Ge => ">=",
        }
    }

    fn holds(self, lhs: f64, rhs: f64, tolerance: f64) -> bool {
        match self {
            Relation::Eq => (lhs - rhs).abs() <= tolerance,
            Relation::Le => lhs <= rhs + tolerance,
            Relation::Ge => lhs + tolerance >= rhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub coef: f64,
    pub var: String,
}

impl Term {
    pub fn new(coef: f64, var: impl Into<String>) -> Self {
        Self {
            coef,
            var: var.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub name: String,
    pub terms: Vec<Term>,
    pub relation: Relation,
    pub rhs: f64,
}

impl Constraint {
    pub fn lhs(&self, value: impl Fn(&str) -> f64) -> f64 {
        self.terms.iter().map(|t| t.coef * value(&t.var)).sum()
    }
}

#[derive(Debug, Clone)]
pub struct LinearModel {
    pub name: String,
    pub sense: Sense,
    objective: Vec<Term>,
    constraints: Vec<Constraint>,
    binaries: Vec<String>,
}

impl LinearModel {
    pub fn new(name: impl Into<String>, sense: Sense) -> Self {
        Self {
            name: name.into(),
            sense,
            objective: Vec::new(),
            constraints: Vec::new(),
            binaries: Vec::new(),
        }
    }

    pub fn add_binary(&mut self, var: impl Into<String>) -> String {
        let var = var.into();
        self.binaries.push(var.clone());
        var
    }

    /// Zero coefficients are dropped.
    pub fn add_objective_term(&mut self, coef: f64, var: impl Into<String>) {
        if coef != 0.0 {
            self.objective.push(Term::new(coef, var));
        }
    }

    /// Constraints without terms are dropped.
    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        terms: Vec<Term>,
        relation: Relation,
        rhs: f64,
    ) {
        if terms.is_empty() {
            return;
        }
        self.constraints.push(Constraint {
            name: name.into(),
            terms,
            relation,
            rhs,
        });
    }

    pub fn binaries(&self) -> &[String] {
        &self.binaries
    }

    pub fn objective(&self) -> &[Term] {
        &self.objective
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn has_variable(&self, var: &str) -> bool {
        self.binaries.iter().any(|b| b == var)
    }

    pub fn objective_value(&self, value: impl Fn(&str) -> f64) -> f64 {
        self.objective.iter().map(|t| t.coef * value(&t.var)).sum()
    }

    /// Names of constraints the given values break.
    pub fn violated_constraints(&self, value: impl Fn(&str) -> f64, tolerance: f64) -> Vec<&str> {
        self.constraints
            .iter()
            .filter(|c| !c.relation.holds(c.lhs(&value), c.rhs, tolerance))
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Render in CPLEX LP format.
    pub fn to_lp(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\\ Problem name: {}", self.name);
        let _ = writeln!(
            out,
            "{}",
            match self.sense {
                Sense::Minimize => "Minimize",
                Sense::Maximize => "Maximize",
            }
        );

        out.push_str(" obj: ");
        if self.objective.is_empty() {
            // LP readers reject an objective with no variables
            match self.binaries.first() {
                Some(var) => out.push_str(&format!("0 {}", var)),
                None => out.push('0'),
            }
        } else {
            out.push_str(&format_terms(&self.objective));
        }
        out.push('\n');

        out.push_str("Subject To\n");
        for constraint in &self.constraints {
            let _ = writeln!(
                out,
                " {}: {} {} {}",
                constraint.name,
                format_terms(&constraint.terms),
                constraint.relation.symbol(),
                format_number(constraint.rhs)
            );
        }

        if !self.binaries.is_empty() {
            out.push_str("Binary\n");
            for chunk in self.binaries.chunks(NAMES_PER_LINE) {
                let _ = writeln!(out, " {}", chunk.join(" "));
            }
        }
        out.push_str("End\n");
        out
    }
}

fn format_terms(terms: &[Term]) -> String {
    let mut out = String::new();
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            if i % TERMS_PER_LINE == 0 {
                out.push_str("\n   ");
            } else {
                out.push(' ');
            }
            out.push_str(if term.coef < 0.0 { "- " } else { "+ " });
        } else if term.coef < 0.0 {
            out.push_str("- ");
        }

        let magnitude = term.coef.abs();
        if magnitude != 1.0 {
            out.push_str(&format_number(magnitude));
            out.push(' ');
        }
        out.push_str(&term.var);
    }
    out
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
