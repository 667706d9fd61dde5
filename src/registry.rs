// Copyright 2024 Cornell University
// released under BSD 3-Clause License
//
// Waveform variable registry (spec.md §4, component C6): holds per-signal
// metadata before any signal/writer exists, grouped by scope so the
// external `VariableGrouper`/`SignalCreator` collaborators can be invoked
// once with the whole accumulated set (spec.md §4.7 step 2-4).

use crate::model::{ScopeId, WaveformVariable};

#[derive(Default)]
pub struct VariableRegistry {
    per_scope: Vec<(ScopeId, Vec<WaveformVariable>)>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, scope: ScopeId, variable: WaveformVariable) {
        match self.per_scope.iter_mut().find(|(s, _)| *s == scope) {
            Some((_, vars)) => vars.push(variable),
            None => self.per_scope.push((scope, vec![variable])),
        }
    }

    pub fn per_scope_mut(&mut self) -> &mut Vec<(ScopeId, Vec<WaveformVariable>)> {
        &mut self.per_scope
    }

    /// Flattens the registry into `(scope, variable)` pairs in registration
    /// order, the shape the `SignalCreator` collaborator expects.
    pub fn flatten(&self) -> Vec<(ScopeId, WaveformVariable)> {
        self.per_scope
            .iter()
            .flat_map(|(scope, vars)| vars.iter().map(move |v| (*scope, v.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.per_scope.iter().map(|(_, v)| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
