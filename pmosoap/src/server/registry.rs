//! Table de routage action -> handler, figée à la construction du serveur.

use std::collections::HashMap;
use std::fmt;

use crate::action::Action;

use super::handler::ActionHandler;

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Action, ActionHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enregistre un handler ; retourne `true` s'il en remplace un autre.
    pub(crate) fn insert(&mut self, action: Action, handler: ActionHandler) -> bool {
        self.handlers.insert(action, handler).is_some()
    }

    pub fn get(&self, action: &Action) -> Option<&ActionHandler> {
        self.handlers.get(action)
    }

    pub fn contains(&self, action: &Action) -> bool {
        self.handlers.contains_key(action)
    }

    /// Actions enregistrées, triées par nom.
    pub fn actions(&self) -> Vec<&Action> {
        let mut actions: Vec<&Action> = self.handlers.keys().collect();
        actions.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        actions
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("actions", &self.actions())
            .finish()
    }
}
