//! Meta inquiry functions
//!
//! All queries resolve *effective* meta rules: a node's own rules merged
//! with its inheritance chain's, own rules winning per target/name. A
//! candidate type applies to a container if any link of the candidate's
//! base chain is named by the container's effective child rules.

use crate::error::MetaError;
use crate::index::MetaIndex;
use std::collections::HashMap;
use trellis_store::{ChildRule, NodePath, PointerRule};
use trellis_tree::Tree;

/// Per-call memo for repeated queries against one root generation
///
/// Threading one cache through a burst of queries avoids recomputing base
/// chains; it must be dropped when the tree mutates.
#[derive(Debug, Default)]
pub struct MetaCache {
    chains: HashMap<NodePath, Vec<NodePath>>,
}

/// Optional filters for a valid-children query
///
/// `children` carries the node's *current* children, supplied by the
/// caller; multiplicity cannot be determined without it and is skipped when
/// the list is empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChildQuery<'a> {
    /// The node's current children, for multiplicity saturation checks
    pub children: &'a [NodePath],

    /// Exclude abstract and connection types
    pub sensitive: bool,

    /// Exclude types whose maximum cardinality is already reached
    pub multiplicity: bool,

    /// Keep only types visible in this aspect of the container
    pub aspect: Option<&'a str>,
}

/// Inquiry interface over one tree + one meta index
#[derive(Debug, Clone, Copy)]
pub struct MetaQuery<'a> {
    tree: &'a Tree,
    index: &'a MetaIndex,
}

impl<'a> MetaQuery<'a> {
    /// Bind a query interface to a tree and its index
    ///
    /// # Errors
    /// [`MetaError::StaleIndex`] if the index was built against an older
    /// meta membership generation.
    pub fn new(tree: &'a Tree, index: &'a MetaIndex) -> Result<Self, MetaError> {
        if !index.is_current(tree) {
            return Err(MetaError::StaleIndex {
                index: index.generation(),
                tree: tree.meta_generation(),
            });
        }
        Ok(Self { tree, index })
    }

    /// Meta elements that are legal children of `node`, filtered per `query`
    ///
    /// Filters apply in the fixed order base applicability → sensitivity →
    /// multiplicity → aspect, short-circuiting on an empty candidate set.
    ///
    /// # Errors
    /// Propagates base-chain resolution failures.
    pub fn valid_children(
        &self,
        node: &NodePath,
        query: &ChildQuery<'_>,
        cache: Option<&mut MetaCache>,
    ) -> Result<Vec<NodePath>, MetaError> {
        let mut local = MetaCache::default();
        let cache = cache.unwrap_or(&mut local);

        // Stage 1: base applicability.
        let mut candidates = Vec::new();
        for element in self.index.elements() {
            if self.matched_child_rule(node, element, cache)?.is_some() {
                candidates.push(element.clone());
            }
        }
        if candidates.is_empty() {
            tracing::trace!(node = %node, "no applicable child types");
            return Ok(candidates);
        }

        // Stage 2: sensitivity (exclude abstract and connection types).
        if query.sensitive {
            let mut kept = Vec::new();
            for candidate in candidates {
                if !self.is_abstract(&candidate)? && !self.is_connection(&candidate, cache)? {
                    kept.push(candidate);
                }
            }
            candidates = kept;
            if candidates.is_empty() {
                return Ok(candidates);
            }
        }

        // Stage 3: multiplicity, only decidable with the current children.
        if query.multiplicity && !query.children.is_empty() {
            let mut kept = Vec::new();
            for candidate in candidates {
                let rule = self
                    .matched_child_rule(node, &candidate, cache)?
                    .unwrap_or_else(|| unreachable!("stage 1 admitted the candidate"));
                if rule.max >= 0 {
                    let mut count: i64 = 0;
                    for child in query.children {
                        if self.chain(child, cache)?.contains(&rule.target) {
                            count += 1;
                        }
                    }
                    if count >= rule.max {
                        continue;
                    }
                }
                kept.push(candidate);
            }
            candidates = kept;
            if candidates.is_empty() {
                return Ok(candidates);
            }
        }

        // Stage 4: aspect visibility.
        if let Some(aspect) = query.aspect {
            let visible = self.effective_aspect(node, aspect)?.unwrap_or_default();
            let mut kept = Vec::new();
            for candidate in candidates {
                let chain = self.chain(&candidate, cache)?;
                if chain.iter().any(|link| visible.contains(link)) {
                    kept.push(candidate);
                }
            }
            candidates = kept;
        }
        Ok(candidates)
    }

    /// Whether `candidate` is a legal child type of `node` (base rule only)
    pub fn is_valid_child(
        &self,
        node: &NodePath,
        candidate: &NodePath,
        cache: Option<&mut MetaCache>,
    ) -> Result<bool, MetaError> {
        let mut local = MetaCache::default();
        let cache = cache.unwrap_or(&mut local);
        Ok(self.matched_child_rule(node, candidate, cache)?.is_some())
    }

    /// Meta elements that are legal targets of the named pointer of `node`
    pub fn valid_pointer_targets(
        &self,
        node: &NodePath,
        name: &str,
        sensitive: bool,
        cache: Option<&mut MetaCache>,
    ) -> Result<Vec<NodePath>, MetaError> {
        let mut local = MetaCache::default();
        let cache = cache.unwrap_or(&mut local);
        let Some(rule) = self.effective_pointer_rule(node, name)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for element in self.index.elements() {
            let chain = self.chain(element, cache)?;
            if !chain.iter().any(|link| rule.targets.contains(link)) {
                continue;
            }
            if sensitive && (self.is_abstract(element)? || self.is_connection(element, cache)?) {
                continue;
            }
            out.push(element.clone());
        }
        Ok(out)
    }

    /// Whether `target` is a legal target of the named pointer of `node`
    pub fn is_valid_pointer_target(
        &self,
        node: &NodePath,
        name: &str,
        target: &NodePath,
        cache: Option<&mut MetaCache>,
    ) -> Result<bool, MetaError> {
        let mut local = MetaCache::default();
        let cache = cache.unwrap_or(&mut local);
        let Some(rule) = self.effective_pointer_rule(node, name)? else {
            return Ok(false);
        };
        let chain = self.chain(target, cache)?;
        Ok(chain.iter().any(|link| rule.targets.contains(link)))
    }

    /// Whether `member` may join the named set of `node`
    ///
    /// Sets share the pointer-rule namespace: the rule named like the set
    /// governs its membership.
    pub fn is_valid_set_member(
        &self,
        node: &NodePath,
        set: &str,
        member: &NodePath,
        cache: Option<&mut MetaCache>,
    ) -> Result<bool, MetaError> {
        self.is_valid_pointer_target(node, set, member, cache)
    }

    /// Abstract types cannot be instantiated (own flag, not inherited)
    pub fn is_abstract(&self, path: &NodePath) -> Result<bool, MetaError> {
        Ok(self.tree.node(path)?.data.meta.is_abstract)
    }

    /// A connection type declares both a `src` and a `dst` pointer rule
    /// somewhere along its chain
    pub fn is_connection(
        &self,
        path: &NodePath,
        cache: &mut MetaCache,
    ) -> Result<bool, MetaError> {
        let chain = self.chain(path, cache)?.clone();
        let mut has_src = false;
        let mut has_dst = false;
        for link in chain {
            let rules = &self.tree.node(&link)?.data.meta.pointers;
            has_src |= rules.contains_key("src");
            has_dst |= rules.contains_key("dst");
            if has_src && has_dst {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Effective rule resolution
    // ------------------------------------------------------------------

    fn chain<'c>(
        &self,
        path: &NodePath,
        cache: &'c mut MetaCache,
    ) -> Result<&'c Vec<NodePath>, MetaError> {
        if !cache.chains.contains_key(path) {
            let chain = self.tree.base_chain(path)?;
            cache.chains.insert(path.clone(), chain);
        }
        Ok(&cache.chains[path])
    }

    /// First child rule (walking the candidate's chain outward) that the
    /// container's effective rules name
    fn matched_child_rule(
        &self,
        node: &NodePath,
        candidate: &NodePath,
        cache: &mut MetaCache,
    ) -> Result<Option<ChildRule>, MetaError> {
        let rules = self.effective_child_rules(node, cache)?;
        let chain = self.chain(candidate, cache)?.clone();
        for link in chain {
            if let Some(rule) = rules.iter().find(|rule| rule.target == link) {
                return Ok(Some(rule.clone()));
            }
        }
        Ok(None)
    }

    /// Union of child rules over the container's chain, own rules winning
    /// per target
    fn effective_child_rules(
        &self,
        node: &NodePath,
        cache: &mut MetaCache,
    ) -> Result<Vec<ChildRule>, MetaError> {
        let chain = self.chain(node, cache)?.clone();
        let mut rules: Vec<ChildRule> = Vec::new();
        for link in chain {
            for rule in &self.tree.node(&link)?.data.meta.children {
                if !rules.iter().any(|seen| seen.target == rule.target) {
                    rules.push(rule.clone());
                }
            }
        }
        Ok(rules)
    }

    /// First pointer rule with the given name along the node's chain
    fn effective_pointer_rule(
        &self,
        node: &NodePath,
        name: &str,
    ) -> Result<Option<PointerRule>, MetaError> {
        for link in self.tree.base_chain(node)? {
            if let Some(rule) = self.tree.node(&link)?.data.meta.pointers.get(name) {
                return Ok(Some(rule.clone()));
            }
        }
        Ok(None)
    }

    /// First aspect definition with the given name along the node's chain
    fn effective_aspect(
        &self,
        node: &NodePath,
        name: &str,
    ) -> Result<Option<Vec<NodePath>>, MetaError> {
        for link in self.tree.base_chain(node)? {
            if let Some(targets) = self.tree.node(&link)?.data.meta.aspects.get(name) {
                return Ok(Some(targets.clone()));
            }
        }
        Ok(None)
    }
}
