//! Meta validation queried through the facade over committed snapshots

use pretty_assertions::assert_eq;
use std::sync::Arc;
use trellis_core::{
    ChildQuery, ChildRule, MemoryBackend, MetaIndex, MetaQuery, MetaRules, NodePath, ObjectStore,
    Project, StoreOptions, META_ASPECT_SET,
};

fn project() -> Project {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Project::new(Arc::new(ObjectStore::new(
        Arc::new(MemoryBackend::new()),
        StoreOptions::default(),
    )))
}

#[tokio::test]
async fn committed_meta_rules_answer_child_queries() {
    let project = project();
    let root = NodePath::root();
    let mut tree = project.create();

    let container_type = tree.create_node(&root, Some(root.clone()), None).unwrap();
    let widget_type = tree.create_node(&root, Some(root.clone()), None).unwrap();
    tree.add_set_member(&root, META_ASPECT_SET, &container_type)
        .unwrap();
    tree.add_set_member(&root, META_ASPECT_SET, &widget_type)
        .unwrap();
    let mut rules = MetaRules::default();
    rules.children.push(ChildRule {
        target: widget_type.clone(),
        min: -1,
        max: -1,
    });
    tree.replace_meta(&container_type, rules).unwrap();

    let snapshot = project.commit(&mut tree).unwrap().root_hash;
    let reopened = project.open(snapshot).await.unwrap();

    let index = MetaIndex::build(&reopened);
    let query = MetaQuery::new(&reopened, &index).unwrap();

    assert_eq!(
        query
            .valid_children(&container_type, &ChildQuery::default(), None)
            .unwrap(),
        vec![widget_type.clone()]
    );
    assert!(query
        .is_valid_child(&container_type, &widget_type, None)
        .unwrap());
    assert!(!query
        .is_valid_child(&widget_type, &container_type, None)
        .unwrap());
}

#[tokio::test]
async fn instances_answer_through_their_base_chain() {
    let project = project();
    let root = NodePath::root();
    let mut tree = project.create();

    let container_type = tree.create_node(&root, Some(root.clone()), None).unwrap();
    let widget_type = tree.create_node(&root, Some(root.clone()), None).unwrap();
    tree.add_set_member(&root, META_ASPECT_SET, &container_type)
        .unwrap();
    tree.add_set_member(&root, META_ASPECT_SET, &widget_type)
        .unwrap();
    let mut rules = MetaRules::default();
    rules.children.push(ChildRule {
        target: widget_type.clone(),
        min: -1,
        max: -1,
    });
    tree.replace_meta(&container_type, rules).unwrap();

    // An instance inherits its legal children from its type.
    let instance = tree
        .create_node(&root, Some(container_type.clone()), None)
        .unwrap();

    let index = MetaIndex::build(&tree);
    let query = MetaQuery::new(&tree, &index).unwrap();
    assert_eq!(
        query
            .valid_children(&instance, &ChildQuery::default(), None)
            .unwrap(),
        vec![widget_type]
    );
}
