//! The topic hierarchy.
//!
//! Topics live in a flat table keyed by [`TopicId`]; parent and child links are
//! id sets. The parent relation must stay acyclic: every edge insertion runs a
//! reachability search from the prospective parent before it is committed.
//!
//! Structural changes are recorded as [`IndexDelta`]s which the owning
//! snapshot forwards to the search index.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::debug;

use crate::{
  error::{Error, Result},
  id::TopicId,
  index::IndexDelta,
  topic::{NewTopic, Topic, TopicKind},
};

#[derive(Debug, Clone, Default)]
pub struct TopicGraph {
  topics:   BTreeMap<TopicId, Topic>,
  /// Inverse of `Topic::parents`; sets are never left empty.
  children: BTreeMap<TopicId, BTreeSet<TopicId>>,
  /// Name or alias → kind → owner.
  names:    BTreeMap<String, BTreeMap<TopicKind, TopicId>>,
  deltas:   Vec<IndexDelta>,
}

impl TopicGraph {
  pub fn new() -> Self { Self::default() }

  /// Rebuild a graph from stored topic records, validating parent references,
  /// name uniqueness and acyclicity.
  pub fn from_records(records: impl IntoIterator<Item = Topic>) -> Result<Self> {
    let mut graph = Self::new();

    for topic in records {
      if graph.topics.contains_key(&topic.topic_id) {
        return Err(Error::invalid(format!("duplicate topic id {}", topic.topic_id)));
      }
      check_kind(&topic.kind)?;
      let names: Vec<String> = topic.names().map(str::to_owned).collect();
      for name in names {
        graph.claim_name(&topic.kind, name, topic.topic_id)?;
      }
      graph.topics.insert(topic.topic_id, topic);
    }

    let edges: Vec<(TopicId, TopicId)> = graph
      .topics
      .values()
      .flat_map(|t| t.parents.iter().map(move |p| (t.topic_id, *p)))
      .collect();
    for (child, parent) in edges {
      if !graph.topics.contains_key(&parent) {
        return Err(Error::TopicNotFound(parent));
      }
      graph.children.entry(parent).or_default().insert(child);
    }

    graph.check_acyclic()?;
    Ok(graph)
  }

  // ── Lookup ────────────────────────────────────────────────────────────────

  pub fn get(&self, id: TopicId) -> Option<&Topic> { self.topics.get(&id) }

  /// Like [`Self::get`], but an unknown id is an error.
  pub fn topic(&self, id: TopicId) -> Result<&Topic> {
    self.topics.get(&id).ok_or(Error::TopicNotFound(id))
  }

  pub fn contains(&self, id: TopicId) -> bool { self.topics.contains_key(&id) }

  pub fn len(&self) -> usize { self.topics.len() }

  pub fn is_empty(&self) -> bool { self.topics.is_empty() }

  /// All topics in id order.
  pub fn iter(&self) -> impl Iterator<Item = &Topic> { self.topics.values() }

  /// Topics without parents.
  pub fn roots(&self) -> impl Iterator<Item = &Topic> {
    self.topics.values().filter(|t| t.is_root())
  }

  pub fn children_of(&self, id: TopicId) -> impl Iterator<Item = TopicId> + '_ {
    self.children.get(&id).into_iter().flatten().copied()
  }

  /// The topic of `kind` whose name or alias is `name`.
  pub fn resolve(&self, kind: &TopicKind, name: &str) -> Option<&Topic> {
    self
      .names
      .get(name.trim())
      .and_then(|by_kind| by_kind.get(kind))
      .and_then(|id| self.topics.get(id))
  }

  /// Every topic, of any kind, whose name or alias is `name`.
  pub fn find(&self, name: &str) -> Vec<&Topic> {
    self
      .names
      .get(name.trim())
      .into_iter()
      .flat_map(|by_kind| by_kind.values())
      .filter_map(|id| self.topics.get(id))
      .collect()
  }

  /// Resolve a name that must identify exactly one topic.
  pub fn lookup(&self, name: &str) -> Result<&Topic> {
    let mut found = self.find(name);
    match found.len() {
      0 => Err(Error::TopicNameNotFound(name.trim().to_owned())),
      1 => Ok(found.remove(0)),
      n => Err(Error::invalid(format!(
        "{name:?} names {n} topics of different kinds; qualify it with a kind"
      ))),
    }
  }

  // ── Expansion ─────────────────────────────────────────────────────────────

  /// `id` and everything reachable from it through child links.
  pub fn descendants(&self, id: TopicId) -> Result<BTreeSet<TopicId>> {
    self.topic(id)?;
    Ok(self.walk(id, |t| self.children_of(t).collect()))
  }

  /// `id` and everything reachable from it through parent links.
  pub fn ancestors(&self, id: TopicId) -> Result<BTreeSet<TopicId>> {
    self.topic(id)?;
    Ok(self.walk(id, |t| self.parents_of(t)))
  }

  fn parents_of(&self, id: TopicId) -> Vec<TopicId> {
    self
      .topics
      .get(&id)
      .map(|t| t.parents.iter().copied().collect())
      .unwrap_or_default()
  }

  fn walk(
    &self,
    start: TopicId,
    next: impl Fn(TopicId) -> Vec<TopicId>,
  ) -> BTreeSet<TopicId> {
    let mut seen = BTreeSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(current) = queue.pop_front() {
      for n in next(current) {
        if seen.insert(n) {
          queue.push_back(n);
        }
      }
    }
    seen
  }

  /// Whether `target` can be reached from `from` by following parent links
  /// (`from == target` counts).
  fn reaches(&self, from: TopicId, target: TopicId) -> bool {
    let mut seen = BTreeSet::new();
    let mut stack = vec![from];
    while let Some(current) = stack.pop() {
      if current == target {
        return true;
      }
      if seen.insert(current) {
        stack.extend(self.parents_of(current));
      }
    }
    false
  }

  fn check_edge(&self, child: TopicId, parent: TopicId) -> Result<()> {
    if self.reaches(parent, child) {
      return Err(Error::Cycle { child, parent });
    }
    Ok(())
  }

  /// Kahn's algorithm over the whole graph. Reports one offending edge when a
  /// cycle exists.
  pub fn check_acyclic(&self) -> Result<()> {
    let mut pending: BTreeMap<TopicId, usize> =
      self.topics.values().map(|t| (t.topic_id, t.parents.len())).collect();
    let mut ready: VecDeque<TopicId> = pending
      .iter()
      .filter(|(_, n)| **n == 0)
      .map(|(id, _)| *id)
      .collect();

    while let Some(id) = ready.pop_front() {
      pending.remove(&id);
      for child in self.children_of(id) {
        if let Some(n) = pending.get_mut(&child) {
          *n -= 1;
          if *n == 0 {
            ready.push_back(child);
          }
        }
      }
    }

    match pending.keys().next() {
      None => Ok(()),
      Some(&child) => {
        let parent = self.topics[&child]
          .parents
          .iter()
          .copied()
          .find(|p| pending.contains_key(p))
          .unwrap_or(child);
        Err(Error::Cycle { child, parent })
      }
    }
  }

  // ── Mutation ──────────────────────────────────────────────────────────────

  /// Create a topic under `input.parents`.
  pub fn create(&mut self, input: NewTopic) -> Result<TopicId> {
    check_kind(&input.kind)?;
    let name = clean_name(&input.name)?;
    let mut aliases = BTreeSet::new();
    for alias in &input.aliases {
      let alias = clean_name(alias)?;
      if alias != name {
        aliases.insert(alias);
      }
    }

    self.ensure_name_free(&input.kind, &name, None)?;
    for alias in &aliases {
      self.ensure_name_free(&input.kind, alias, None)?;
    }
    for parent in &input.parents {
      self.topic(*parent)?;
    }

    let topic_id = TopicId::new();
    for parent in &input.parents {
      self.check_edge(topic_id, *parent)?;
    }

    let schema = clean_keys(&input.schema)?;
    let topic = Topic {
      topic_id,
      name,
      kind: input.kind,
      description: input.description,
      parents: input.parents,
      aliases,
      schema,
    };

    for parent in &topic.parents {
      self.children.entry(*parent).or_default().insert(topic_id);
    }
    let names: Vec<String> = topic.names().map(str::to_owned).collect();
    for name in names {
      self.claim_name(&topic.kind, name, topic_id)?;
    }
    debug!(%topic_id, name = %topic.name, kind = %topic.kind, "created topic");
    self.topics.insert(topic_id, topic);
    Ok(topic_id)
  }

  /// Link `child` under `parent`. Returns `false` if the link already existed.
  pub fn add_parent(&mut self, child: TopicId, parent: TopicId) -> Result<bool> {
    self.topic(parent)?;
    if self.topic(child)?.parents.contains(&parent) {
      return Ok(false);
    }
    self.check_edge(child, parent)?;
    self.link(child, parent);
    self.deltas.push(IndexDelta::HierarchyChanged(child));
    Ok(true)
  }

  /// Unlink `child` from `parent`. Returns `false` if there was no such link.
  ///
  /// With `require_rooted`, removing a topic's last parent is refused.
  pub fn remove_parent(
    &mut self,
    child: TopicId,
    parent: TopicId,
    require_rooted: bool,
  ) -> Result<bool> {
    self.topic(parent)?;
    let topic = self.topic(child)?;
    if !topic.parents.contains(&parent) {
      return Ok(false);
    }
    if require_rooted && topic.parents.len() == 1 {
      return Err(Error::Orphan(child));
    }
    self.unlink(child, parent);
    self.deltas.push(IndexDelta::HierarchyChanged(child));
    Ok(true)
  }

  pub fn rename(&mut self, id: TopicId, name: &str) -> Result<()> {
    let name = clean_name(name)?;
    let topic = self.topic(id)?;
    if topic.name == name {
      return Ok(());
    }
    let kind = topic.kind.clone();
    let old = topic.name.clone();
    self.ensure_name_free(&kind, &name, Some(id))?;

    let Some(topic) = self.topics.get_mut(&id) else {
      return Err(Error::TopicNotFound(id));
    };
    // Promoting an alias to the primary name.
    topic.aliases.remove(&name);
    topic.name = name.clone();
    self.release_name(&kind, &old);
    self.claim_name(&kind, name, id)
  }

  /// Returns `false` if the topic already answers to `alias`.
  pub fn add_alias(&mut self, id: TopicId, alias: &str) -> Result<bool> {
    let alias = clean_name(alias)?;
    let topic = self.topic(id)?;
    if topic.names().any(|n| n == alias) {
      return Ok(false);
    }
    let kind = topic.kind.clone();
    self.ensure_name_free(&kind, &alias, None)?;
    if let Some(topic) = self.topics.get_mut(&id) {
      topic.aliases.insert(alias.clone());
    }
    self.claim_name(&kind, alias, id)?;
    Ok(true)
  }

  pub fn remove_alias(&mut self, id: TopicId, alias: &str) -> Result<bool> {
    let alias = alias.trim();
    let Some(topic) = self.topics.get_mut(&id) else {
      return Err(Error::TopicNotFound(id));
    };
    if !topic.aliases.remove(alias) {
      return Ok(false);
    }
    let kind = topic.kind.clone();
    self.release_name(&kind, alias);
    Ok(true)
  }

  pub fn set_description(&mut self, id: TopicId, description: &str) -> Result<()> {
    let Some(topic) = self.topics.get_mut(&id) else {
      return Err(Error::TopicNotFound(id));
    };
    description.clone_into(&mut topic.description);
    Ok(())
  }

  pub fn declare_schema_key(&mut self, id: TopicId, key: &str) -> Result<bool> {
    let key = clean_key(key)?;
    let Some(topic) = self.topics.get_mut(&id) else {
      return Err(Error::TopicNotFound(id));
    };
    Ok(topic.schema.insert(key))
  }

  pub fn remove_schema_key(&mut self, id: TopicId, key: &str) -> Result<bool> {
    let Some(topic) = self.topics.get_mut(&id) else {
      return Err(Error::TopicNotFound(id));
    };
    Ok(topic.schema.remove(key.trim()))
  }

  /// Remove a topic. Its children lose the link to it. Reference checks
  /// against facts are the caller's responsibility.
  pub(crate) fn remove(&mut self, id: TopicId) -> Result<Topic> {
    let topic = self.topics.remove(&id).ok_or(Error::TopicNotFound(id))?;
    for parent in &topic.parents {
      self.detach_child(*parent, id);
    }
    for kid in self.children.remove(&id).unwrap_or_default() {
      if let Some(child) = self.topics.get_mut(&kid) {
        child.parents.remove(&id);
      }
      self.deltas.push(IndexDelta::HierarchyChanged(kid));
    }
    for name in topic.names() {
      self.release_name(&topic.kind, name);
    }
    debug!(topic_id = %id, name = %topic.name, "removed topic");
    Ok(topic)
  }

  /// Remove a topic, first re-linking its children under its own parents so
  /// their ancestry above it is preserved.
  pub(crate) fn remove_and_reparent(&mut self, id: TopicId) -> Result<Topic> {
    let parents = self.topic(id)?.parents.clone();
    let kids: Vec<TopicId> = self.children_of(id).collect();
    for kid in kids {
      for parent in &parents {
        self.link(kid, *parent);
      }
    }
    self.remove(id)
  }

  /// Fold `sources` into `target`: the union of their parent and child links
  /// lands on `target`, schema keys are combined and the sources are removed.
  ///
  /// Fails with [`Error::Cycle`] if the combined links are not acyclic, in
  /// which case the graph is left half-merged; callers run this on a staged
  /// copy.
  pub(crate) fn merge_into(
    &mut self,
    sources: &BTreeSet<TopicId>,
    target: TopicId,
  ) -> Result<()> {
    let mut absorbed = sources.clone();
    absorbed.insert(target);

    let mut parents = BTreeSet::new();
    let mut kids = BTreeSet::new();
    // An empty schema allows every key, so it absorbs any other.
    let mut schema = Some(BTreeSet::new());
    for id in &absorbed {
      let topic = self.topic(*id)?;
      parents.extend(topic.parents.iter().copied());
      if topic.schema.is_empty() {
        schema = None;
      } else if let Some(keys) = schema.as_mut() {
        keys.extend(topic.schema.iter().cloned());
      }
      kids.extend(self.children_of(*id));
    }
    parents.retain(|p| !absorbed.contains(p));
    kids.retain(|k| !absorbed.contains(k));

    for source in sources {
      self.remove(*source)?;
    }
    for parent in &parents {
      self.link(target, *parent);
    }
    for kid in &kids {
      self.link(*kid, target);
    }
    if let Some(topic) = self.topics.get_mut(&target) {
      topic.schema = schema.unwrap_or_default();
    }
    self.deltas.push(IndexDelta::HierarchyChanged(target));

    // Every new edge touches `target`, so any cycle runs through it.
    for parent in &parents {
      if self.reaches(*parent, target) {
        return Err(Error::Cycle { child: target, parent: *parent });
      }
    }
    Ok(())
  }

  pub(crate) fn has_deltas(&self) -> bool { !self.deltas.is_empty() }

  pub(crate) fn take_deltas(&mut self) -> Vec<IndexDelta> {
    std::mem::take(&mut self.deltas)
  }

  // ── Internals ─────────────────────────────────────────────────────────────

  fn link(&mut self, child: TopicId, parent: TopicId) {
    if let Some(topic) = self.topics.get_mut(&child) {
      topic.parents.insert(parent);
      self.children.entry(parent).or_default().insert(child);
    }
  }

  fn unlink(&mut self, child: TopicId, parent: TopicId) {
    if let Some(topic) = self.topics.get_mut(&child) {
      topic.parents.remove(&parent);
    }
    self.detach_child(parent, child);
  }

  fn detach_child(&mut self, parent: TopicId, child: TopicId) {
    if let Some(kids) = self.children.get_mut(&parent) {
      kids.remove(&child);
      if kids.is_empty() {
        self.children.remove(&parent);
      }
    }
  }

  fn ensure_name_free(
    &self,
    kind: &TopicKind,
    name: &str,
    except: Option<TopicId>,
  ) -> Result<()> {
    match self.names.get(name).and_then(|by_kind| by_kind.get(kind)) {
      Some(owner) if Some(*owner) != except => Err(Error::DuplicateName {
        kind: kind.clone(),
        name: name.to_owned(),
      }),
      _ => Ok(()),
    }
  }

  fn claim_name(&mut self, kind: &TopicKind, name: String, id: TopicId) -> Result<()> {
    self.ensure_name_free(kind, &name, Some(id))?;
    self.names.entry(name).or_default().insert(kind.clone(), id);
    Ok(())
  }

  fn release_name(&mut self, kind: &TopicKind, name: &str) {
    if let Some(by_kind) = self.names.get_mut(name) {
      by_kind.remove(kind);
      if by_kind.is_empty() {
        self.names.remove(name);
      }
    }
  }
}

fn check_kind(kind: &TopicKind) -> Result<()> {
  if !kind.is_canonical() {
    return Err(Error::invalid(format!("{:?} is not a valid custom topic kind", kind.as_str())));
  }
  Ok(())
}

fn clean_name(name: &str) -> Result<String> {
  let name = name.trim();
  if name.is_empty() {
    return Err(Error::invalid("topic names must not be empty"));
  }
  Ok(name.to_owned())
}

fn clean_key(key: &str) -> Result<String> {
  let key = key.trim();
  if key.is_empty() {
    return Err(Error::invalid("attribute keys must not be empty"));
  }
  Ok(key.to_owned())
}

fn clean_keys(keys: &BTreeSet<String>) -> Result<BTreeSet<String>> {
  keys.iter().map(|k| clean_key(k)).collect()
}
