//! Query Executor
//!
//! Evaluates an `Expr` against the tag, property and relation indices.
//!
//! Evaluation threads an optional *start set* through the tree. `and`
//! evaluates its right side with the left result as start set, so every
//! token after the first only has to look at ids that can still match.
//!
//! # Execution Pipeline
//!
//! ```text
//! text → parse → eval(expr, start = None) → sorted ids → paginate
//! ```

use crate::index::{PropIndex, RelIndex, TagIndex, VALUE_KEY_CHARS};
use crate::query::ast::{Expr, RelPath, Token};
use crate::query::error::{QueryError, QueryResult};
use crate::query::parser::parse_query;
use crate::storage::{parse_id, EntityId, IdSet, PropValue};
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::collections::HashMap;

/// Read-only view of the indices a query runs against
pub struct SearchContext<'a> {
    pub tags: &'a TagIndex,
    pub props: &'a PropIndex,
    pub rels: &'a RelIndex,
    /// Ids known only to collaborators (blobs, history)
    pub extra_ids: IdSet,
}

impl<'a> SearchContext<'a> {
    pub fn new(tags: &'a TagIndex, props: &'a PropIndex, rels: &'a RelIndex) -> Self {
        Self {
            tags,
            props,
            rels,
            extra_ids: IdSet::new(),
        }
    }

    /// Add ids that belong to the universe without appearing in any index
    pub fn with_extra_ids(mut self, ids: impl IntoIterator<Item = EntityId>) -> Self {
        self.extra_ids.extend(ids);
        self
    }

    /// Every id known to any store
    pub fn universe(&self) -> IdSet {
        let mut ids = self.tags.get_all_ids().clone();
        ids.extend(self.props.get_all_ids());
        ids.extend(self.rels.get_all_ids());
        ids.extend(&self.extra_ids);
        ids
    }
}

/// Pagination applied to a sorted result, in field order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Keep the first N ids
    pub first: Option<usize>,
    /// Keep the last N ids
    pub last: Option<usize>,
    /// Inclusive start position
    pub start: Option<usize>,
    /// Inclusive end position
    pub end: Option<usize>,
    /// Keep ids strictly greater than this
    pub after: Option<EntityId>,
    /// Keep ids strictly less than this
    pub before: Option<EntityId>,
}

impl SearchOptions {
    pub fn first(n: usize) -> Self {
        Self {
            first: Some(n),
            ..Default::default()
        }
    }

    pub fn paginate(&self, mut ids: Vec<EntityId>) -> Vec<EntityId> {
        if let Some(n) = self.first {
            ids.truncate(n);
        }
        if let Some(n) = self.last {
            let skip = ids.len().saturating_sub(n);
            ids.drain(..skip);
        }
        if self.start.is_some() || self.end.is_some() {
            let start = self.start.unwrap_or(0);
            let end = self
                .end
                .map_or(ids.len(), |end| end.saturating_add(1))
                .min(ids.len());
            ids = if start < end {
                ids[start..end].to_vec()
            } else {
                Vec::new()
            };
        }
        if let Some(after) = self.after {
            ids.retain(|&id| id > after);
        }
        if let Some(before) = self.before {
            ids.retain(|&id| id < before);
        }
        ids
    }
}

/// Query executor
pub struct QueryExecutor<'a> {
    ctx: &'a SearchContext<'a>,
    /// Computed on first use by `*` or `not`
    universe: OnceCell<IdSet>,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(ctx: &'a SearchContext<'a>) -> Self {
        Self {
            ctx,
            universe: OnceCell::new(),
        }
    }

    /// Run a query string and return the paginated, ascending ids
    pub fn search(&self, query: &str, options: &SearchOptions) -> QueryResult<Vec<EntityId>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let ids = if query == "*" {
            self.universe().clone()
        } else {
            let expr = parse_query(query)?;
            tracing::debug!("Evaluating query {}", expr);
            self.evaluate(&expr)?
        };

        Ok(options.paginate(ids.into_iter().collect()))
    }

    /// Evaluate a parsed expression with no start set
    pub fn evaluate(&self, expr: &Expr) -> QueryResult<IdSet> {
        self.eval(expr, None)
    }

    fn universe(&self) -> &IdSet {
        self.universe.get_or_init(|| self.ctx.universe())
    }

    fn eval(&self, expr: &Expr, start: Option<&IdSet>) -> QueryResult<IdSet> {
        match expr {
            Expr::And(left, right) => {
                let left = self.eval(left, start)?;
                if left.is_empty() {
                    return Ok(left);
                }
                let right = self.eval(right, Some(&left))?;
                Ok(right.intersection(&left).copied().collect())
            }
            Expr::Or(left, right) => {
                let mut ids = self.eval(left, start)?;
                ids.extend(self.eval(right, start)?);
                Ok(ids)
            }
            Expr::Not(inner) => {
                let base = match start {
                    Some(start) => start.clone(),
                    None => self.universe().clone(),
                };
                let excluded = self.eval(inner, Some(&base))?;
                Ok(base.difference(&excluded).copied().collect())
            }
            Expr::Token(token) => self.eval_token(token, start),
        }
    }

    fn eval_token(&self, token: &Token, start: Option<&IdSet>) -> QueryResult<IdSet> {
        if let Some(path) = token.path() {
            return self.eval_path(&path, start);
        }

        let Some(keyword) = token.keyword() else {
            if token.value == "*" {
                return Ok(start.cloned().unwrap_or_else(|| self.universe().clone()));
            }
            return Ok(IdSet::new());
        };

        match keyword.as_str() {
            "id" => {
                let id = token_id(&token.value)?;
                Ok(restrict(&IdSet::from([id]), start))
            }
            "tag" => Ok(restrict(self.ctx.tags.get_by_tag(&token.value), start)),
            "prop" => Ok(self.eval_prop(&token.value, start)),
            "rel" => {
                let (label, id) = relation_target(&token.value)?;
                Ok(restrict(self.ctx.rels.get_related_reverse(id, label), start))
            }
            "revrel" | "relrev" => {
                let (label, id) = relation_target(&token.value)?;
                Ok(restrict(self.ctx.rels.get_related(id, label), start))
            }
            _ => {
                tracing::debug!("Unknown query keyword '{}'", keyword);
                Ok(IdSet::new())
            }
        }
    }

    /// Property operators, checked in this order: `=^` prefix, trailing `^`
    /// suffix, `=` exact, `~` contains, `<` / `>` bounds, bare name
    fn eval_prop(&self, expr: &str, start: Option<&IdSet>) -> IdSet {
        let props = self.ctx.props;

        if let Some((name, prefix)) = expr.split_once("=^") {
            let prefix = prefix.to_lowercase();
            if start.is_none() && prefix.chars().count() <= VALUE_KEY_CHARS {
                return props.get_ids_by_value_prefix(name, &prefix);
            }
            return self.scan(name, start, |text| text.starts_with(&prefix));
        }

        if let Some(rest) = expr.strip_suffix('^') {
            if let Some((name, suffix)) = rest.rsplit_once('=') {
                let suffix = suffix.to_lowercase();
                return self.scan(name, start, |text| text.ends_with(&suffix));
            }
        }

        if let Some((name, value)) = expr.split_once('=') {
            let wanted = value.to_lowercase();
            return restrict(&props.get_ids_by_prop(name, Some(value)), start)
                .into_iter()
                .filter(|&id| prop_text(props, id, name).is_some_and(|text| text == wanted))
                .collect();
        }

        if let Some((name, needle)) = expr.split_once('~') {
            let needle = needle.to_lowercase();
            let candidates = props
                .contains_index()
                .and_then(|index| index.candidates(&needle));
            let base = match candidates {
                Some(candidates) => restrict(&candidates, start),
                None => self.scan_base(start).clone(),
            };
            return base
                .into_iter()
                .filter(|&id| {
                    props
                        .get_prop(id, name)
                        .and_then(PropValue::as_str)
                        .is_some_and(|text| text.to_lowercase().contains(&needle))
                })
                .collect();
        }

        if let Some((name, bound)) = expr.split_once('<') {
            let bound = bound.to_lowercase();
            return self.scan(name, start, |text| text < bound.as_str());
        }

        if let Some((name, bound)) = expr.split_once('>') {
            let bound = bound.to_lowercase();
            return self.scan(name, start, |text| text > bound.as_str());
        }

        if expr.is_empty() {
            return IdSet::new();
        }
        restrict(&props.get_ids_by_prop(expr, None), start)
    }

    /// Ids a property scan has to look at
    fn scan_base<'s>(&'s self, start: Option<&'s IdSet>) -> &'s IdSet {
        start.unwrap_or_else(|| self.ctx.props.get_all_ids())
    }

    /// Ids whose lowercase `name` value satisfies `matches`
    fn scan(&self, name: &str, start: Option<&IdSet>, matches: impl Fn(&str) -> bool) -> IdSet {
        self.scan_base(start)
            .iter()
            .copied()
            .filter(|&id| prop_text(self.ctx.props, id, name).is_some_and(|text| matches(&text)))
            .collect()
    }

    /// Resolve `a.b.token` (reverse hops) or `a..b.token` (forward hops)
    fn eval_path(&self, path: &RelPath, start: Option<&IdSet>) -> QueryResult<IdSet> {
        let Some(start) = start else {
            let mut current = self.eval_token(&path.terminal, None)?;
            for label in path.labels.iter().rev() {
                current = current
                    .iter()
                    .flat_map(|&id| self.hop(id, label, !path.forward))
                    .copied()
                    .collect();
                if current.is_empty() {
                    break;
                }
            }
            return Ok(current);
        };

        let mut verdicts: HashMap<EntityId, bool> = HashMap::new();
        let mut result = IdSet::new();
        for &outer in start {
            let mut frontier = IdSet::from([outer]);
            for label in &path.labels {
                frontier = frontier
                    .iter()
                    .flat_map(|&id| self.hop(id, label, path.forward))
                    .copied()
                    .collect();
                if frontier.is_empty() {
                    break;
                }
            }

            for terminal in frontier {
                let valid = match verdicts.get(&terminal) {
                    Some(&valid) => valid,
                    None => {
                        let single = IdSet::from([terminal]);
                        let valid = !self.eval_token(&path.terminal, Some(&single))?.is_empty();
                        verdicts.insert(terminal, valid);
                        valid
                    }
                };
                if valid {
                    result.insert(outer);
                    break;
                }
            }
        }
        Ok(result)
    }

    /// One relation hop: ids relating to `id` (reverse) or related from it
    fn hop(&self, id: EntityId, label: &str, reverse: bool) -> &IdSet {
        if reverse {
            self.ctx.rels.get_related_reverse(id, Some(label))
        } else {
            self.ctx.rels.get_related(id, Some(label))
        }
    }
}

/// Parse and evaluate `query` against `ctx`
pub fn search(
    ctx: &SearchContext<'_>,
    query: &str,
    options: &SearchOptions,
) -> QueryResult<Vec<EntityId>> {
    QueryExecutor::new(ctx).search(query, options)
}

/// `ids` filtered by the start set, if any
fn restrict(ids: &IdSet, start: Option<&IdSet>) -> IdSet {
    match start {
        Some(start) if start.len() < ids.len() => {
            start.iter().filter(|id| ids.contains(id)).copied().collect()
        }
        Some(start) => ids.iter().filter(|id| start.contains(id)).copied().collect(),
        None => ids.clone(),
    }
}

fn prop_text(props: &PropIndex, id: EntityId, name: &str) -> Option<String> {
    props
        .get_prop(id, name)
        .map(|value| value.as_text().to_lowercase())
}

fn token_id(value: &str) -> QueryResult<EntityId> {
    parse_id(value).map_err(|_| QueryError::InvalidToken(format!("'{}' is not an entity id", value)))
}

/// `[label=]id` of a rel/revrel token. An empty label means any label.
fn relation_target(value: &str) -> QueryResult<(Option<&str>, EntityId)> {
    match value.rsplit_once('=') {
        Some((label, id)) => {
            let label = (!label.is_empty()).then_some(label);
            Ok((label, token_id(id)?))
        }
        None => Ok((None, token_id(value)?)),
    }
}
