//! Edge case tests for replay-dom
//!
//! Stale keys, re-entrancy and boundary conditions.

use std::cell::RefCell;
use std::rc::Rc;

use replay_dom::{
    CssRule, Document, DomError, Event, EventTarget, EventType, ListenerOptions, MutationObserverInit, NodeKind,
    ShadowRootMode,
};

#[test]
fn test_stale_key_operations_fail_cleanly() {
    let doc = Document::new("about:blank");
    let div = doc.create_element("div");
    doc.drop_node(div).unwrap();

    assert_eq!(doc.set_attribute(div, "id", "x"), Err(DomError::StaleNode(div)));
    assert!(doc.append_child(doc.body().unwrap(), div).is_err());
    assert_eq!(doc.tag_name(div), None);
    assert!(doc.children(div).is_empty());
    assert!(!doc.is_connected(div));
}

#[test]
fn test_reused_slot_is_a_different_node() {
    let doc = Document::new("about:blank");
    let a = doc.create_element("a");
    doc.drop_node(a).unwrap();
    let b = doc.create_element("b");

    assert_eq!(a.index(), b.index());
    assert_ne!(a, b);
    assert_eq!(doc.tag_name(a), None);
    assert_eq!(doc.tag_name(b).as_deref(), Some("b"));
}

#[test]
fn test_insert_before_self_reference() {
    let doc = Document::new("about:blank");
    let body = doc.body().unwrap();
    let a = doc.create_element("a");
    let b = doc.create_element("b");
    doc.append_child(body, a).unwrap();
    doc.append_child(body, b).unwrap();

    doc.insert_before(body, a, Some(a)).unwrap();
    assert_eq!(doc.children(body), vec![a, b]);
}

#[test]
fn test_host_cannot_enter_own_shadow_tree() {
    let doc = Document::new("about:blank");
    let host = doc.create_element("div");
    let shadow = doc.attach_shadow(host, ShadowRootMode::Closed).unwrap();

    assert!(matches!(doc.append_child(shadow, host), Err(DomError::HierarchyRequest(_))));
    assert!(doc.attach_shadow(host, ShadowRootMode::Open).is_err());
    assert!(doc.drop_node(shadow).is_err());
}

#[test]
fn test_text_ops_on_element_rejected() {
    let doc = Document::new("about:blank");
    let div = doc.create_element("div");
    assert_eq!(doc.set_text(div, "x"), Err(DomError::InvalidNodeType("character data")));
    let text = doc.create_text("x");
    assert_eq!(doc.set_attribute(text, "id", "x"), Err(DomError::InvalidNodeType("element")));
}

#[test]
fn test_removed_subtree_no_longer_observed() {
    let doc = Document::new("about:blank");
    let body = doc.body().unwrap();
    let div = doc.create_element("div");
    doc.append_child(body, div).unwrap();

    let observer = doc.create_mutation_observer(|_, _| {});
    observer.observe(body, MutationObserverInit::all());
    doc.remove_child(body, div).unwrap();
    doc.set_attribute(div, "id", "detached").unwrap();

    let records = observer.take_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].removed_nodes, vec![div]);
}

#[test]
fn test_listener_added_during_dispatch_waits() {
    let doc = Document::new("about:blank");
    let body = doc.body().unwrap();
    let count = Rc::new(RefCell::new(0));

    let c = Rc::clone(&count);
    doc.add_event_listener(
        EventTarget::Node(body),
        EventType::Click,
        ListenerOptions::default(),
        move |d, _| {
            let c = Rc::clone(&c);
            d.add_event_listener(
                EventTarget::Node(d.body().unwrap()),
                EventType::Click,
                ListenerOptions::default(),
                move |_, _| *c.borrow_mut() += 1,
            );
        },
    );

    doc.dispatch_event(Event::mouse(EventType::Click, body, 0.0, 0.0));
    assert_eq!(*count.borrow(), 0);
    doc.dispatch_event(Event::mouse(EventType::Click, body, 0.0, 0.0));
    assert_eq!(*count.borrow(), 1);
}

#[test]
fn test_dispatch_at_dropped_node_is_harmless() {
    let doc = Document::new("about:blank");
    let div = doc.create_element("div");
    doc.drop_node(div).unwrap();
    let event = doc.dispatch_event(Event::at(EventType::Click, div));
    assert_eq!(event.event_type, EventType::Click);
}

#[test]
fn test_bad_rule_index() {
    let doc = Document::new("about:blank");
    let style = doc.create_element("style");
    assert_eq!(
        doc.insert_rule(style, &[], CssRule::new("a {}"), 1),
        Err(DomError::IndexSize { index: 1, len: 0 })
    );
    let div = doc.create_element("div");
    assert!(doc.insert_rule(div, &[], CssRule::new("a {}"), 0).is_err());
}

#[test]
fn test_timer_scheduled_from_timer() {
    let doc = Document::new("about:blank");
    let fired = Rc::new(RefCell::new(Vec::new()));

    let f = Rc::clone(&fired);
    doc.set_timeout(10.0, move |d| {
        f.borrow_mut().push(d.now());
        let f = Rc::clone(&f);
        d.set_timeout(10.0, move |d| f.borrow_mut().push(d.now()));
    });
    doc.advance_time(100.0);
    assert_eq!(*fired.borrow(), vec![10.0, 20.0]);
}

#[test]
fn test_unicode_text() {
    let doc = Document::new("about:blank");
    let text = doc.create_text("héllo 世界 🚀");
    assert_eq!(doc.text(text).as_deref(), Some("héllo 世界 🚀"));
}

#[test]
fn test_processing_instruction_data() {
    let doc = Document::new("about:blank");
    let pi = doc.create_processing_instruction("href=\"a.css\"");
    assert_eq!(doc.node_kind(pi), Some(NodeKind::ProcessingInstruction));
    doc.set_text(pi, "href=\"b.css\"").unwrap();
    assert_eq!(doc.text(pi).as_deref(), Some("href=\"b.css\""));
}
