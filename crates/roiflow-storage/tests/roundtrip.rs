//! Saving graph state and loading it into a fresh graph.

use ndarray::{ArrayD, IxDyn};

use roiflow_core::{
    Array, CoreResult, ExecuteContext, Graph, GraphConfig, LaneGroup, LazyResult, OpContext,
    Operator, OperatorId, Roi, SlotRef, SlotSpec, Value, ValueKind,
};
use roiflow_storage::{
    Attr, Group, GroupStore, InMemoryStore, OperatorSerializer, SerialLaneCount, SerialSlot,
    SqliteStore, StorageError,
};

/// A lane template with an array input, a name and a shared setting.
struct OpNamedImage;

impl Operator for OpNamedImage {
    fn name(&self) -> &str {
        "OpNamedImage"
    }

    fn slots(&self) -> Vec<SlotSpec> {
        vec![
            SlotSpec::input("Image", ValueKind::Array),
            SlotSpec::input("Name", ValueKind::Str).optional(),
            SlotSpec::input("Axes", ValueKind::Str).optional(),
            SlotSpec::output("Output", ValueKind::Array),
        ]
    }

    fn configure(&mut self, ctx: &mut OpContext<'_>) -> CoreResult<()> {
        let meta = ctx.meta(ctx.input("Image")?)?;
        let output = ctx.output("Output")?;
        ctx.set_meta(output, meta)
    }

    fn execute(&self, ctx: &ExecuteContext<'_>, _output: &SlotRef, roi: &Roi) -> CoreResult<LazyResult> {
        ctx.get(ctx.input("Image")?, roi)
    }
}

fn image(seed: f32) -> Array {
    ArrayD::from_shape_vec(IxDyn(&[2, 3]), (0..6).map(|v| v as f32 + seed).collect())
        .unwrap()
        .into_shared()
}

fn build() -> (Graph, OperatorId) {
    let graph = Graph::new(GraphConfig::named("storage-test").with_worker_threads(1)).unwrap();
    let group = graph
        .add_operator(LaneGroup::new("images", || Box::new(OpNamedImage), &["Axes"]))
        .unwrap();
    (graph, group)
}

fn serializer(graph: &Graph, group: OperatorId) -> OperatorSerializer {
    OperatorSerializer::new("Input Data")
        .with_item(SerialLaneCount::new(group))
        .with_item(SerialSlot::new(graph.input(group, "Image").unwrap(), "Images"))
        .with_item(SerialSlot::new(graph.input(group, "Name").unwrap(), "Names"))
        .with_item(
            SerialSlot::new(graph.input(group, "Axes").unwrap(), "axistags")
                .with_legacy_key("axisorder"),
        )
}

fn populate(graph: &Graph, group: OperatorId) {
    graph.resize_lanes(group, 2).unwrap();
    let images = graph.input(group, "Image").unwrap();
    let names = graph.input(group, "Name").unwrap();
    for lane in 0..2 {
        graph
            .set_value(graph.subslot(images, lane).unwrap(), image(lane as f32 * 10.0))
            .unwrap();
        graph
            .set_value(graph.subslot(names, lane).unwrap(), format!("lane-{lane}"))
            .unwrap();
    }
    graph.set_value(graph.input(group, "Axes").unwrap(), "yx").unwrap();
}

fn check_restored(graph: &Graph, group: OperatorId) {
    assert_eq!(graph.lane_count(group).unwrap(), 2);
    let images = graph.input(group, "Image").unwrap();
    let names = graph.input(group, "Name").unwrap();
    let output = graph.output(group, "Output").unwrap();
    for lane in 0..2 {
        assert_eq!(
            graph.value(graph.subslot(names, lane).unwrap()).unwrap(),
            Value::Str(format!("lane-{lane}"))
        );
        assert_eq!(
            graph.own_value(graph.subslot(images, lane).unwrap()).unwrap(),
            Some(Value::Array(image(lane as f32 * 10.0)))
        );
        let data = graph
            .get_all(graph.subslot(output, lane).unwrap())
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(data, image(lane as f32 * 10.0));
    }
    assert_eq!(
        graph.value(graph.input(group, "Axes").unwrap()).unwrap(),
        Value::Str("yx".into())
    );
}

#[test]
fn sqlite_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("project.db");
    let path = path.to_str().unwrap();

    let (graph, group) = build();
    populate(&graph, group);
    let mut store = SqliteStore::new(path).unwrap();
    serializer(&graph, group).save(&graph, &mut store).unwrap();
    drop(store);

    let reopened = SqliteStore::new(path).unwrap();
    let (fresh, fresh_group) = build();
    serializer(&fresh, fresh_group).load(&fresh, &reopened).unwrap();
    check_restored(&fresh, fresh_group);
}

#[test]
fn in_memory_roundtrip() {
    let (graph, group) = build();
    populate(&graph, group);
    let mut store = InMemoryStore::new();
    serializer(&graph, group).save(&graph, &mut store).unwrap();

    let (fresh, fresh_group) = build();
    serializer(&fresh, fresh_group).load(&fresh, &store).unwrap();
    check_restored(&fresh, fresh_group);
}

#[test]
fn dirty_tracking_follows_graph_changes() {
    let (graph, group) = build();
    populate(&graph, group);
    let mut store = InMemoryStore::new();
    let mut ser = serializer(&graph, group);
    assert!(ser.is_dirty(&graph).unwrap());

    ser.save(&graph, &mut store).unwrap();
    assert!(!ser.is_dirty(&graph).unwrap());

    let names = graph.input(group, "Name").unwrap();
    graph.set_value(graph.subslot(names, 1).unwrap(), "renamed").unwrap();
    assert!(ser.is_dirty(&graph).unwrap());
}

#[test]
fn legacy_axis_key_is_accepted() {
    let mut store = InMemoryStore::new();
    let legacy = Group::new()
        .with_attr("NumLanes", Attr::Int(1))
        .with_attr("axisorder", Attr::Str("tyx".into()));
    store.save_tree("Input Data", &legacy).unwrap();

    let (graph, group) = build();
    serializer(&graph, group).load(&graph, &store).unwrap();
    assert_eq!(graph.lane_count(group).unwrap(), 1);
    assert_eq!(
        graph.value(graph.input(group, "Axes").unwrap()).unwrap(),
        Value::Str("tyx".into())
    );
}

#[test]
fn missing_serializer_group_loads_nothing() {
    let store = InMemoryStore::new();
    let (graph, group) = build();
    serializer(&graph, group).load(&graph, &store).unwrap();
    assert_eq!(graph.lane_count(group).unwrap(), 0);
}

#[test]
fn corrupt_lane_count_is_reported() {
    let mut store = InMemoryStore::new();
    store
        .save_tree("Input Data", &Group::new().with_attr("NumLanes", Attr::Str("two".into())))
        .unwrap();
    let (graph, group) = build();
    let err = serializer(&graph, group).load(&graph, &store).unwrap_err();
    assert!(matches!(err, StorageError::Corrupt { .. }));
}

#[test]
fn sqlite_tree_matches_in_memory_tree() {
    let (graph, group) = build();
    populate(&graph, group);
    let ser = serializer(&graph, group);
    let snapshot = ser.snapshot(&graph).unwrap();

    let mut sqlite = SqliteStore::in_memory().unwrap();
    sqlite.save_tree("Input Data", &snapshot).unwrap();
    assert_eq!(sqlite.load_tree("Input Data").unwrap(), snapshot);
    assert_eq!(
        sqlite.list_groups("Input Data/Images").unwrap(),
        vec!["0", "1"]
    );
}
