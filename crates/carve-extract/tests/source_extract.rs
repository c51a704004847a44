use std::path::PathBuf;

use carve_config::SourceConfig;
use carve_core::{DependencyBreakdown, ExtractionOutput, RawEdge, SourceReference};
use carve_extract::{
    DependencyExtractor, ExtractError, SourceExtractor, TypeIndex, collect_reference_events,
    extract_units, outline_unit, parse_units,
};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn edge<'a>(output: &'a ExtractionOutput, source: &str, target: &str) -> &'a RawEdge {
    output
        .edges
        .iter()
        .find(|edge| edge.source_fqn == source && edge.target_fqn == target)
        .unwrap_or_else(|| panic!("missing edge {source} -> {target}: {:?}", output.edges))
}

fn counts(method_calls: u32, field_accesses: u32, object_creations: u32, type_references: u32) -> DependencyBreakdown {
    DependencyBreakdown {
        method_calls,
        field_accesses,
        object_creations,
        type_references,
    }
}

#[tokio::test]
async fn minimal_graph_has_weighted_edges_per_reference_kind() {
    let extractor = SourceExtractor::new(SourceConfig::default());
    let output = extractor
        .extract(&SourceReference::SourceTree {
            root: fixture("minimal"),
        })
        .await
        .expect("extract minimal fixture");

    let declared = output
        .declared
        .iter()
        .map(|declared| declared.fqn.as_str())
        .collect::<Vec<_>>();
    assert_eq!(declared, vec!["app.A", "app.B", "app.C"]);
    assert_eq!(output.edges.len(), 3);

    let a_b = edge(&output, "app.A", "app.B");
    assert_eq!(a_b.weight, 1);
    assert_eq!(a_b.breakdown, Some(counts(1, 0, 0, 0)));

    let a_c = edge(&output, "app.A", "app.C");
    assert_eq!(a_c.weight, 2);
    assert_eq!(a_c.breakdown, Some(counts(0, 1, 1, 0)));

    let b_c = edge(&output, "app.B", "app.C");
    assert_eq!(b_c.weight, 3);
    assert_eq!(b_c.breakdown, Some(counts(3, 0, 0, 0)));

    assert!(output.edges.iter().all(|edge| edge.source_fqn != edge.target_fqn));
}

#[tokio::test]
async fn inherited_field_receivers_resolve_through_project_superclass() {
    let extractor = SourceExtractor::new(SourceConfig::default());
    let output = extractor
        .extract(&SourceReference::SourceTree {
            root: fixture("inherited"),
        })
        .await
        .expect("extract inherited fixture");

    assert_eq!(output.declared.len(), 3);
    assert_eq!(
        edge(&output, "app.orders.OrderService", "app.repo.Repository").breakdown,
        Some(counts(2, 0, 0, 0))
    );
    assert_eq!(
        edge(&output, "app.orders.OrderService", "app.base.BaseService").breakdown,
        Some(counts(0, 0, 0, 1))
    );
    assert_eq!(
        edge(&output, "app.base.BaseService", "app.repo.Repository").breakdown,
        Some(counts(0, 0, 0, 1))
    );
    assert_eq!(output.edges.len(), 3);
}

#[tokio::test]
async fn test_sources_are_included_only_when_enabled() {
    let extractor = SourceExtractor::new(SourceConfig {
        include_tests: true,
        ..SourceConfig::default()
    });
    let output = extractor
        .extract(&SourceReference::SourceTree {
            root: fixture("inherited"),
        })
        .await
        .expect("extract with tests");

    assert_eq!(output.declared.len(), 4);
    let test_edge = edge(&output, "app.orders.OrderServiceTest", "app.orders.OrderService");
    assert_eq!(test_edge.breakdown, Some(counts(1, 0, 1, 0)));
}

#[tokio::test]
async fn missing_source_root_is_an_input_error() {
    let extractor = SourceExtractor::new(SourceConfig::default());
    let err = extractor
        .extract(&SourceReference::SourceTree {
            root: fixture("does-not-exist"),
        })
        .await
        .expect_err("missing root");
    assert!(matches!(err, ExtractError::InvalidSource(_)));
}

#[test]
fn repeated_references_accumulate_into_one_edge() {
    let units = parse_units([
        (
            "Checkout.java",
            r#"
package shop;

public class Checkout {
    public void pay() {
        int capacity = Cart.CAPACITY;
        Cart.open();
        Cart.close();
    }
}
"#,
        ),
        (
            "Cart.java",
            r#"
package shop;

public class Cart {
    public static final int CAPACITY = 10;
    public static void open() {}
    public static void close() {}
}
"#,
        ),
    ])
    .expect("parse units");

    let output = extract_units(&units);
    assert_eq!(output.edges.len(), 1);
    let checkout_cart = edge(&output, "shop.Checkout", "shop.Cart");
    assert_eq!(checkout_cart.weight, 3);
    assert_eq!(checkout_cart.breakdown, Some(counts(2, 1, 0, 0)));
}

#[test]
fn locals_parameters_and_type_arguments_resolve_to_project_types() {
    let units = parse_units([
        (
            "Billing.java",
            r#"
package shop.billing;

import java.util.List;
import shop.model.*;

public class Billing {
    public Invoice bill(Order order, List<Line> lines) {
        var invoice = new Invoice();
        for (Line line : lines) {
            invoice.add(line.amount);
        }
        order.close();
        lines.forEach(item -> Audit.record(item));
        return invoice;
    }
}
"#,
        ),
        (
            "Model.java",
            r#"
package shop.model;

public class Order {
    public void close() {}
}

class Invoice {
    void add(int amount) {}
}

class Line {
    int amount;
}

class Audit {
    static void record(Object item) {}
}
"#,
        ),
    ])
    .expect("parse units");

    let output = extract_units(&units);
    let billing = "shop.billing.Billing";

    // Return type and creation, then one call through the `var` local.
    assert_eq!(
        edge(&output, billing, "shop.model.Invoice").breakdown,
        Some(counts(1, 0, 1, 1))
    );
    // Parameter type plus the call on the parameter.
    assert_eq!(
        edge(&output, billing, "shop.model.Order").breakdown,
        Some(counts(1, 0, 0, 1))
    );
    // Type argument, loop variable type and field access on the loop variable.
    assert_eq!(
        edge(&output, billing, "shop.model.Line").breakdown,
        Some(counts(0, 1, 0, 2))
    );
    assert_eq!(
        edge(&output, billing, "shop.model.Audit").breakdown,
        Some(counts(1, 0, 0, 0))
    );
}

#[test]
fn catch_parameters_resolve_calls_on_the_caught_exception() {
    let units = parse_units([
        (
            "Checkout.java",
            r#"
package shop;

public class Checkout {
    public void pay() {
        try {
            charge();
        } catch (PaymentException e) {
            e.report();
        } catch (StockException | RuntimeException other) {
            other.getMessage();
        }
    }

    private void charge() {}
}
"#,
        ),
        (
            "Errors.java",
            r#"
package shop;

class PaymentException extends RuntimeException {
    void report() {}
}

class StockException extends RuntimeException {}
"#,
        ),
    ])
    .expect("parse units");

    let output = extract_units(&units);
    // Catch type plus the call on the caught exception.
    assert_eq!(
        edge(&output, "shop.Checkout", "shop.PaymentException").breakdown,
        Some(counts(1, 0, 0, 1))
    );
    // A multi-catch alternative is a type reference only.
    assert_eq!(
        edge(&output, "shop.Checkout", "shop.StockException").breakdown,
        Some(counts(0, 0, 0, 1))
    );
}

#[test]
fn unresolved_references_are_skipped_and_reported() {
    let units = parse_units([(
        "Sender.java",
        r#"
package mail;

import com.vendor.Client;

public class Sender {
    private Client client;

    public void send(Envelope envelope) {
        client.post(envelope);
        Unknown.call();
    }
}
"#,
    )])
    .expect("parse units");

    let outlines = units.iter().map(outline_unit).collect::<Vec<_>>();
    let index = TypeIndex::build(&outlines);
    let collected = collect_reference_events(&units[0], &outlines[0], &index);

    assert!(collected.events.is_empty());
    assert!(collected.failures.is_empty());
    assert!(collected.unresolved.contains("Client"));
    assert!(collected.unresolved.contains("Envelope"));

    let output = extract_units(&units);
    assert_eq!(output.declared.len(), 1);
    assert!(output.edges.is_empty());
}

#[test]
fn broken_declaration_counts_no_dependencies() {
    let units = parse_units([
        (
            "Broken.java",
            r#"
package app;

public class Broken {
    void run() {
        Target.call( ;
    }
}
"#,
        ),
        (
            "Healthy.java",
            r#"
package app;

public class Healthy {
    void run() {
        Target.call();
    }
}
"#,
        ),
        (
            "Target.java",
            r#"
package app;

public class Target {
    static void call() {}
}
"#,
        ),
    ])
    .expect("parse units");

    let outlines = units.iter().map(outline_unit).collect::<Vec<_>>();
    let index = TypeIndex::build(&outlines);
    let broken = collect_reference_events(&units[0], &outlines[0], &index);
    assert_eq!(broken.failures.len(), 1);
    assert_eq!(broken.failures[0].fqn, "app.Broken");

    let output = extract_units(&units);
    assert!(output.edges.iter().all(|edge| edge.source_fqn != "app.Broken"));
    assert_eq!(
        edge(&output, "app.Healthy", "app.Target").breakdown,
        Some(counts(1, 0, 0, 0))
    );
}

#[test]
fn nested_types_are_separate_nodes() {
    let units = parse_units([(
        "Order.java",
        r#"
package shop;

public class Order {
    private Line first;

    public static class Line {
        private Order owner;
    }
}
"#,
    )])
    .expect("parse units");

    let output = extract_units(&units);
    let declared = output
        .declared
        .iter()
        .map(|declared| declared.fqn.as_str())
        .collect::<Vec<_>>();
    assert_eq!(declared, vec!["shop.Order", "shop.Order.Line"]);
    assert_eq!(
        edge(&output, "shop.Order", "shop.Order.Line").breakdown,
        Some(counts(0, 0, 0, 1))
    );
    assert_eq!(
        edge(&output, "shop.Order.Line", "shop.Order").breakdown,
        Some(counts(0, 0, 0, 1))
    );
}
