//! Type surface binder
//!
//! Walks a `TypeDescription`, names every public member, synthesizes its
//! thunk and registers the result with the session's compilation service.
//! Symbols are planned and checked against the session up front, so a
//! naming conflict fails the bind before anything is registered.

use crate::bind::describe::{Describe, MemberDescriptor, MemberKind, TypeDescription};
use crate::bind::naming::{is_c_identifier, NamingRules};
use crate::bind::thunk::synthesize;
use crate::error::{BindError, Result, SymbolError};
use crate::session::Session;
use std::collections::HashSet;
use tracing::debug;

/// A member together with the symbol it will be exported as
#[derive(Debug, Clone)]
pub struct PlannedSymbol<'a> {
    pub symbol: String,
    pub member: &'a MemberDescriptor,
}

/// Name every public member of `description`
///
/// Overloaded methods and accessors (same kind and name) are rejected
/// unless each overload carries an explicit symbol. Any remaining symbol
/// collision, including with the release symbol, is an error.
pub fn plan_symbols<'a>(
    description: &'a TypeDescription,
    rules: &NamingRules,
) -> std::result::Result<Vec<PlannedSymbol<'a>>, BindError> {
    let class = description.class().name();

    let mut overloads: HashSet<(MemberKind, &str)> = HashSet::new();
    for member in description.public_members() {
        if member.kind == MemberKind::Constructor || member.symbol.is_some() {
            continue;
        }
        if !overloads.insert((member.kind, member.name.as_str())) {
            return Err(BindError::OverloadedMember {
                class: class.to_string(),
                member: member.name.clone(),
            });
        }
    }

    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(rules.release_symbol().to_string());

    let mut planned = Vec::new();
    for member in description.public_members() {
        let symbol = rules.symbol_for(member);
        if !is_c_identifier(&symbol) {
            return Err(BindError::InvalidSymbol(symbol));
        }
        if !seen.insert(symbol.clone()) {
            return Err(BindError::DuplicateSymbol {
                symbol,
                class: class.to_string(),
            });
        }
        planned.push(PlannedSymbol { symbol, member });
    }
    Ok(planned)
}

/// Binds host types into one session
pub struct Binder<'s> {
    session: &'s mut Session,
    rules: NamingRules,
}

impl<'s> Binder<'s> {
    pub(crate) fn new(session: &'s mut Session, rules: NamingRules) -> Self {
        Self { session, rules }
    }

    /// Use different naming rules for the types bound next
    pub fn with_rules(mut self, rules: NamingRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn rules(&self) -> &NamingRules {
        &self.rules
    }

    /// Symbols `bind` would register, without registering anything
    pub fn symbols(&self, description: &TypeDescription) -> Result<Vec<String>> {
        Ok(plan_symbols(description, &self.rules)?
            .into_iter()
            .map(|planned| planned.symbol)
            .collect())
    }

    /// Register a thunk for every public member plus the release symbol
    ///
    /// Returns the member symbols in declaration order.
    pub fn bind(&mut self, description: &TypeDescription) -> Result<Vec<String>> {
        let planned = plan_symbols(description, &self.rules)?;
        if let Some(taken) = planned
            .iter()
            .find(|p| self.session.is_registered(&p.symbol))
        {
            return Err(SymbolError::Duplicate(taken.symbol.clone()).into());
        }

        let registry = self.session.registry().clone();
        let thunks = planned
            .iter()
            .map(|p| synthesize(p.member, &p.symbol, &registry))
            .collect::<Result<Vec<_>>>()?;
        self.session
            .ensure_release_symbol(self.rules.release_symbol())?;

        let mut symbols = Vec::with_capacity(thunks.len());
        for thunk in thunks {
            let symbol = thunk.symbol().to_string();
            self.session
                .register_native(&symbol, thunk.into_callable())?;
            symbols.push(symbol);
        }

        debug!(
            class = description.class().name(),
            count = symbols.len(),
            "bound type"
        );
        Ok(symbols)
    }

    pub fn bind_type<T: Describe>(&mut self) -> Result<Vec<String>> {
        self.bind(&T::describe())
    }
}
