//! Rule-based strategies that group classes by naming and call structure
//! instead of modularity. Both are deterministic: the same graph always yields
//! the same partition.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use async_trait::async_trait;
use carve_core::{DependencyGraph, Partition, StrategyKind, package_of, simple_name};
use tracing::debug;

use crate::{PartitionStrategy, StrategyError, ensure_min_nodes};

/// Package segments that name an architectural layer rather than a business
/// domain.
const LAYER_SEGMENTS: &[&str] = &[
    "adapter", "adapters", "api", "application", "common", "config", "configuration", "controller",
    "controllers", "core", "dao", "domain", "dto", "dtos", "entity", "entities", "exception",
    "exceptions", "handler", "handlers", "impl", "infrastructure", "mapper", "mappers", "model",
    "models", "persistence", "port", "ports", "repo", "repository", "repositories", "rest",
    "service", "services", "shared", "support", "util", "utils", "web",
];

/// Role suffixes stripped from a simple name before reading its domain word.
/// Longer suffixes come first so `ServiceImpl` wins over `Impl`.
const ROLE_SUFFIXES: &[&str] = &[
    "ServiceImpl", "Repository", "Controller", "Endpoint", "Resource", "Listener", "Consumer",
    "Service", "Handler", "Mapper", "Entity", "Impl", "Dao", "Dto",
];

/// Simple-name suffixes marking an entry point into the system.
const ACTOR_SUFFIXES: &[&str] = &[
    "Controller", "Resource", "Endpoint", "Handler", "Listener", "Consumer", "Scheduler", "Job",
    "Api",
];

/// Groups classes by business domain.
///
/// The domain of a class is the first non-layer package segment below the
/// package root shared by the whole graph. Classes that only sit in layer
/// packages fall back to the leading word of their simple name once role
/// suffixes are removed (`OrderController` is in `order`), mapped onto a
/// package domain already using that word. A class with neither joins the
/// domain it is most strongly connected to, or stays unassigned when that is
/// not unique.
#[derive(Debug, Clone)]
pub struct DomainDrivenStrategy {
    min_nodes: usize,
}

impl DomainDrivenStrategy {
    pub fn new(min_nodes: usize) -> Self {
        Self { min_nodes }
    }
}

#[async_trait]
impl PartitionStrategy for DomainDrivenStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DomainDriven
    }

    async fn partition(&self, graph: &DependencyGraph) -> Result<Partition, StrategyError> {
        ensure_min_nodes(self.kind(), graph, self.min_nodes)?;

        let root = common_package_root(
            graph
                .nodes()
                .iter()
                .map(|node| package_of(top_level_type(&node.fqn))),
        );
        let package_domains = graph
            .nodes()
            .iter()
            .map(|node| package_domain(&node.fqn, &root))
            .collect::<Vec<_>>();

        // A name word seen inside exactly one package domain points back to it,
        // so `web.InvoiceController` joins `billing` when `billing.InvoiceService`
        // exists.
        let mut aliases = BTreeMap::<String, Option<&str>>::new();
        for (node, domain) in graph.nodes().iter().zip(&package_domains) {
            if let (Some(domain), Some(word)) = (domain, name_domain(simple_name(top_level_type(&node.fqn)))) {
                aliases
                    .entry(word)
                    .and_modify(|existing| {
                        if *existing != Some(domain.as_str()) {
                            *existing = None;
                        }
                    })
                    .or_insert(Some(domain.as_str()));
            }
        }

        let mut domains = graph
            .nodes()
            .iter()
            .zip(&package_domains)
            .map(|(node, domain)| {
                domain.clone().or_else(|| {
                    name_domain(simple_name(top_level_type(&node.fqn))).map(|word| match aliases.get(&word) {
                        Some(Some(aliased)) => (*aliased).to_owned(),
                        _ => word,
                    })
                })
            })
            .collect::<Vec<_>>();

        let strengths = neighbour_strengths(graph);
        let mut attached = 0;
        let resolved = domains.clone();
        for (position, domain) in domains.iter_mut().enumerate() {
            if domain.is_some() {
                continue;
            }
            // Only first-pass domains vote, so attachment order cannot matter.
            let mut votes = BTreeMap::<&str, f64>::new();
            for (neighbour, weight) in &strengths[position] {
                if let Some(candidate) = resolved[*neighbour].as_deref() {
                    *votes.entry(candidate).or_insert(0.0) += weight;
                }
            }
            if let Some(winner) = unique_max(&votes) {
                *domain = Some(winner.to_owned());
                attached += 1;
            }
        }

        let assignments = graph
            .nodes()
            .iter()
            .zip(domains)
            .filter_map(|(node, domain)| domain.map(|domain| (node.fqn.clone(), domain)))
            .collect::<Vec<_>>();

        debug!(
            job_id = graph.job_id(),
            package_root = %root.join("."),
            attached,
            unassigned = graph.node_count() - assignments.len(),
            "domain-driven partition finished"
        );

        Ok(Partition::from_assignments(self.kind(), assignments))
    }
}

/// Groups classes behind the entry point that reaches them first.
///
/// Actors are classes nothing else depends on but which depend on something,
/// plus classes named like entry points (`...Controller`, `...Listener`,
/// `...Job`). Every class reachable along outgoing dependencies joins the
/// nearest actor; a class equally near to two actors, or reached by none,
/// stays unassigned. Clusters are named after their actor.
#[derive(Debug, Clone)]
pub struct ActorDrivenStrategy {
    min_nodes: usize,
}

impl ActorDrivenStrategy {
    pub fn new(min_nodes: usize) -> Self {
        Self { min_nodes }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Nearest {
    Unreached,
    Actor { actor: usize, distance: usize },
    Tied { distance: usize },
}

#[async_trait]
impl PartitionStrategy for ActorDrivenStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ActorDriven
    }

    async fn partition(&self, graph: &DependencyGraph) -> Result<Partition, StrategyError> {
        ensure_min_nodes(self.kind(), graph, self.min_nodes)?;

        let successors = successor_lists(graph);
        let mut has_incoming = vec![false; graph.node_count()];
        for targets in &successors {
            for target in targets {
                has_incoming[*target] = true;
            }
        }
        let actors = graph
            .nodes()
            .iter()
            .enumerate()
            .filter(|(position, node)| {
                let entry_point = !has_incoming[*position] && !successors[*position].is_empty();
                entry_point || is_actor_name(simple_name(&node.fqn))
            })
            .map(|(position, _)| position)
            .collect::<Vec<_>>();

        let mut nearest = vec![Nearest::Unreached; graph.node_count()];
        for &actor in &actors {
            for (node, distance) in bfs_distances(&successors, actor) {
                nearest[node] = match nearest[node] {
                    Nearest::Unreached => Nearest::Actor { actor, distance },
                    Nearest::Actor {
                        distance: current, ..
                    }
                    | Nearest::Tied { distance: current } => {
                        if distance < current {
                            Nearest::Actor { actor, distance }
                        } else if distance == current {
                            Nearest::Tied { distance }
                        } else {
                            nearest[node]
                        }
                    }
                };
            }
        }

        let nodes = graph.nodes();
        let mut tied = 0;
        let mut assignments = Vec::new();
        for (position, state) in nearest.iter().enumerate() {
            match state {
                Nearest::Actor { actor, .. } => {
                    assignments.push((nodes[position].fqn.clone(), nodes[*actor].fqn.clone()));
                }
                Nearest::Tied { .. } => tied += 1,
                Nearest::Unreached => {}
            }
        }

        debug!(
            job_id = graph.job_id(),
            actors = actors.len(),
            tied,
            unassigned = graph.node_count() - assignments.len(),
            "actor-driven partition finished"
        );

        Ok(Partition::from_assignments(self.kind(), assignments))
    }
}

fn common_package_root<'a>(packages: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut root: Option<Vec<&str>> = None;
    for package in packages {
        let segments = package.split('.').filter(|segment| !segment.is_empty());
        root = Some(match root {
            None => segments.collect(),
            Some(current) => current
                .into_iter()
                .zip(segments)
                .take_while(|(left, right)| left == right)
                .map(|(left, _)| left)
                .collect(),
        });
    }
    root.unwrap_or_default()
}

fn package_domain(fqn: &str, root: &[&str]) -> Option<String> {
    package_of(top_level_type(fqn))
        .split('.')
        .filter(|segment| !segment.is_empty())
        .skip(root.len())
        .map(str::to_ascii_lowercase)
        .find(|segment| !LAYER_SEGMENTS.contains(&segment.as_str()))
}

/// The top-level type enclosing `fqn`, cut after the first segment that
/// starts with an uppercase letter: `web.OrderController.Request` gives
/// `web.OrderController`.
fn top_level_type(fqn: &str) -> &str {
    let mut end = 0;
    for segment in fqn.split('.') {
        end += segment.len();
        if segment.chars().next().is_some_and(char::is_uppercase) {
            return &fqn[..end];
        }
        end += 1;
    }
    fqn
}

fn name_domain(simple_name: &str) -> Option<String> {
    let mut stem = simple_name;
    for suffix in ROLE_SUFFIXES {
        if let Some(rest) = stem.strip_suffix(suffix)
            && !rest.is_empty()
        {
            stem = rest;
            break;
        }
        if stem == *suffix {
            return None;
        }
    }
    let word = leading_word(stem);
    if word.is_empty() {
        return None;
    }
    Some(word.to_ascii_lowercase())
}

/// First camel-case word; an acronym run counts as one word (`HTTPClient`
/// gives `HTTP`).
fn leading_word(name: &str) -> &str {
    let chars = name.char_indices().collect::<Vec<_>>();
    for window in 1..chars.len() {
        let (offset, current) = chars[window];
        let previous = chars[window - 1].1;
        let next_is_lower = chars
            .get(window + 1)
            .is_some_and(|(_, next)| next.is_lowercase());
        let starts_word = current.is_uppercase()
            && (previous.is_lowercase()
                || previous.is_ascii_digit()
                || (previous.is_uppercase() && next_is_lower));
        if starts_word {
            return &name[..offset];
        }
    }
    name
}

fn is_actor_name(simple_name: &str) -> bool {
    ACTOR_SUFFIXES
        .iter()
        .any(|suffix| simple_name.len() > suffix.len() && simple_name.ends_with(suffix))
}

fn neighbour_strengths(graph: &DependencyGraph) -> Vec<Vec<(usize, f64)>> {
    let mut strengths = vec![Vec::new(); graph.node_count()];
    for (left, right, weight) in graph.undirected_weights() {
        strengths[left].push((right, weight));
        strengths[right].push((left, weight));
    }
    strengths
}

fn unique_max<'a>(votes: &BTreeMap<&'a str, f64>) -> Option<&'a str> {
    let best = votes.values().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut winners = votes
        .iter()
        .filter(|(_, weight)| (**weight - best).abs() < 1e-9)
        .map(|(domain, _)| *domain);
    let winner = winners.next()?;
    winners.next().is_none().then_some(winner)
}

fn successor_lists(graph: &DependencyGraph) -> Vec<BTreeSet<usize>> {
    let mut successors = vec![BTreeSet::new(); graph.node_count()];
    for edge in graph.edges() {
        if let (Some(source), Some(target)) =
            (graph.index_of(&edge.source_fqn), graph.index_of(&edge.target_fqn))
        {
            successors[source].insert(target);
        }
    }
    successors
}

fn bfs_distances(successors: &[BTreeSet<usize>], start: usize) -> HashMap<usize, usize> {
    let mut distances = HashMap::from([(start, 0)]);
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        let distance = distances[&node];
        for next in &successors[node] {
            if !distances.contains_key(next) {
                distances.insert(*next, distance + 1);
                queue.push_back(*next);
            }
        }
    }
    distances
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{edge, graph, two_modules};

    #[test]
    fn name_domains_strip_role_suffixes() {
        assert_eq!(name_domain("OrderController").as_deref(), Some("order"));
        assert_eq!(name_domain("OrderLineServiceImpl").as_deref(), Some("order"));
        assert_eq!(name_domain("HTTPClientFactory").as_deref(), Some("http"));
        assert_eq!(name_domain("Service"), None);
        assert_eq!(leading_word("Invoice2Pdf"), "Invoice2");
    }

    #[test]
    fn nested_types_resolve_to_their_top_level_type() {
        assert_eq!(top_level_type("web.OrderController.Request"), "web.OrderController");
        assert_eq!(top_level_type("com.shop.Order"), "com.shop.Order");
        assert_eq!(top_level_type("lowercase.only"), "lowercase.only");
    }

    #[tokio::test]
    async fn nested_types_share_the_domain_of_their_outer_type() {
        let graph = graph(
            &[],
            vec![
                edge("com.shop.web.OrderController.Request", "com.shop.order.OrderService", 1),
                edge("com.shop.web.OrderController", "com.shop.order.OrderService", 2),
                edge("com.shop.billing.Invoice", "com.shop.billing.Invoice.Line", 1),
            ],
        );
        let partition = DomainDrivenStrategy::new(2)
            .partition(&graph)
            .await
            .expect("partition");
        partition.validate(&graph).expect("valid");

        assert_eq!(
            partition.cluster_of("com.shop.web.OrderController.Request"),
            Some("order")
        );
        assert_eq!(partition.cluster_of("com.shop.billing.Invoice.Line"), Some("billing"));
        assert_eq!(
            partition.clusters.keys().cloned().collect::<Vec<_>>(),
            vec!["billing", "order"]
        );
    }

    #[test]
    fn package_root_is_the_shared_prefix() {
        let root = common_package_root(["com.shop.order", "com.shop.billing.api", "com.shop"].into_iter());
        assert_eq!(root, vec!["com", "shop"]);
        assert!(common_package_root(std::iter::empty()).is_empty());
    }

    #[tokio::test]
    async fn domain_driven_uses_business_packages() {
        let graph = two_modules();
        let partition = DomainDrivenStrategy::new(2)
            .partition(&graph)
            .await
            .expect("partition");
        partition.validate(&graph).expect("valid");

        assert_eq!(
            partition.clusters.keys().cloned().collect::<Vec<_>>(),
            vec!["billing", "misc", "order"]
        );
        assert_eq!(partition.cluster_of("com.shop.order.OrderRepository"), Some("order"));
        assert_eq!(partition.modularity, None);
    }

    #[tokio::test]
    async fn layered_packages_fall_back_to_names_and_neighbours() {
        let graph = graph(
            &[],
            vec![
                edge("com.shop.web.OrderController", "com.shop.service.OrderService", 3),
                edge("com.shop.web.PaymentController", "com.shop.service.PaymentService", 3),
                edge("com.shop.service.OrderService", "com.shop.util.Helper", 1),
                edge("com.shop.util.Service", "com.shop.service.OrderService", 2),
                edge("com.shop.util.Service", "com.shop.service.PaymentService", 1),
                edge("com.shop.util.Dao", "com.shop.service.OrderService", 1),
                edge("com.shop.util.Dao", "com.shop.service.PaymentService", 1),
            ],
        );
        let partition = DomainDrivenStrategy::new(2)
            .partition(&graph)
            .await
            .expect("partition");
        partition.validate(&graph).expect("valid");

        assert_eq!(partition.cluster_of("com.shop.web.OrderController"), Some("order"));
        assert_eq!(partition.cluster_of("com.shop.service.PaymentService"), Some("payment"));
        assert_eq!(partition.cluster_of("com.shop.util.Helper"), Some("helper"));
        // `Service` has no name of its own and leans towards order.
        assert_eq!(partition.cluster_of("com.shop.util.Service"), Some("order"));
        // `Dao` is pulled equally both ways.
        assert_eq!(partition.cluster_of("com.shop.util.Dao"), None);
    }

    #[tokio::test]
    async fn actor_driven_follows_entry_points() {
        let graph = two_modules();
        let partition = ActorDrivenStrategy::new(2)
            .partition(&graph)
            .await
            .expect("partition");
        partition.validate(&graph).expect("valid");

        assert_eq!(
            partition.cluster_of("com.shop.billing.InvoiceService"),
            Some("com.shop.billing.BillingController")
        );
        assert_eq!(
            partition.cluster_of("com.shop.order.OrderRepository"),
            Some("com.shop.order.OrderController")
        );
        assert_eq!(partition.cluster_of("com.shop.misc.Orphan"), None);
        assert_eq!(partition.cluster_count(), 2);
    }

    #[tokio::test]
    async fn equally_near_actors_leave_a_node_unassigned() {
        let graph = graph(
            &[],
            vec![
                edge("app.Checkout", "app.Pricing", 1),
                edge("app.Refunds", "app.Pricing", 1),
                edge("app.Checkout", "app.Cart", 1),
            ],
        );
        let partition = ActorDrivenStrategy::new(2)
            .partition(&graph)
            .await
            .expect("partition");

        assert_eq!(partition.cluster_of("app.Pricing"), None);
        assert_eq!(partition.cluster_of("app.Cart"), Some("app.Checkout"));
        assert_eq!(partition.cluster_of("app.Refunds"), Some("app.Refunds"));
    }

    #[tokio::test]
    async fn heuristics_are_deterministic() {
        let graph = two_modules();
        let domain = DomainDrivenStrategy::new(2);
        let actor = ActorDrivenStrategy::new(2);

        assert_eq!(
            domain.partition(&graph).await.expect("first"),
            domain.partition(&graph).await.expect("second")
        );
        assert_eq!(
            actor.partition(&graph).await.expect("first"),
            actor.partition(&graph).await.expect("second")
        );
    }
}
