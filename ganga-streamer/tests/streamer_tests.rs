use ganga_schema::{Item, ObjectRef, PluginRegistry, Schema, Value, ValueType, Version};
use ganga_streamer::{from_reader, from_str, to_string, StreamError, TreePrinter};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

// ===== FIXTURES =====

fn plugins() -> Arc<PluginRegistry> {
    let plugins = PluginRegistry::new();
    plugins.register(
        Schema::new("applications", "Executable", Version::new(1, 0))
            .with_item("exe", Item::simple("echo"))
            .with_item(
                "args",
                Item::simple(Vec::<Value>::new())
                    .lenient_sequence()
                    .typelist([ValueType::Str, ValueType::Int]),
            ),
    );
    plugins.register(
        Schema::new("backends", "Local", Version::new(1, 0))
            .with_item("nice", Item::simple(0i64))
            .with_item("workdir", Item::simple("").transient())
            .with_item("pid", Item::simple(Value::None).hidden()),
    );
    plugins.register(
        Schema::new("datasets", "FileList", Version::new(1, 0))
            .with_item("files", Item::simple(Vec::<Value>::new()).sequence()),
    );
    plugins.register(
        Schema::new("tasks", "Task", Version::new(1, 0))
            .with_item("label", Item::simple("").no_load_default())
            .with_item("size", Item::simple(3i64)),
    );
    plugins.register(
        Schema::new("jobs", "Job", Version::new(1, 2))
            .with_item("id", Item::simple(Value::None).protected())
            .with_item("name", Item::simple(""))
            .with_item("status", Item::simple("new").protected())
            .with_item(
                "outputfiles",
                Item::simple(Vec::<Value>::new()).sequence().typelist([ValueType::Str]),
            )
            .with_item("weight", Item::simple(1.0))
            .with_item("info", Item::shared(Value::Dict(BTreeMap::new())))
            .with_item("application", Item::component("applications", "Executable"))
            .with_item("backend", Item::component("backends", "Local"))
            .with_item("inputdata", Item::optional_component("datasets"))
            .with_item("subjobs", Item::component_list("jobs").protected()),
    );
    plugins
}

fn new_job(plugins: &Arc<PluginRegistry>) -> ObjectRef {
    plugins.instantiate("jobs", "Job").unwrap()
}

fn reload(plugins: &Arc<PluginRegistry>, obj: &ObjectRef) -> ObjectRef {
    let xml = to_string(obj, "").unwrap();
    let loaded = from_str(plugins, &xml).unwrap();
    assert!(loaded.errors.is_empty(), "unexpected errors: {:?}", loaded.errors);
    loaded.object
}

const EXECUTABLE_OPEN: &str =
    "<class name=\"Executable\" version=\"1.0\" category=\"applications\">";

// ── Writing ──────────────────────────────────────────────────────

#[test]
fn record_layout_is_stable() {
    let plugins = plugins();
    let app = plugins.instantiate("applications", "Executable").unwrap();
    app.set_attribute("args", vec![Value::from("a"), Value::Int(1)])
        .unwrap();

    let expected = "\
<root>
 <class name=\"Executable\" version=\"1.0\" category=\"applications\">
  <attribute name=\"exe\"><value>'echo'</value></attribute>
  <attribute name=\"args\">
   <sequence>
    <value>'a'</value>
    <value>1</value>
   </sequence>
  </attribute>
 </class>
</root>
";
    assert_eq!(to_string(&app, "").unwrap(), expected);
}

#[test]
fn components_nest_one_level_deeper() {
    let plugins = plugins();
    let job = new_job(&plugins);
    let xml = to_string(&job, "").unwrap();
    assert!(xml.contains("  <attribute name=\"application\">\n   <class name=\"Executable\""));
    assert!(xml.contains("  <attribute name=\"inputdata\">\n   <value>None</value>\n  </attribute>"));
}

#[test]
fn transient_attributes_are_not_written() {
    let plugins = plugins();
    let backend = plugins.instantiate("backends", "Local").unwrap();
    backend.set_attribute("workdir", "/tmp/scratch").unwrap();
    let xml = to_string(&backend, "").unwrap();
    assert!(!xml.contains("workdir"));
    assert!(xml.contains("nice"));

    let loaded = from_str(&plugins, &xml).unwrap().object;
    assert_eq!(loaded.get_attribute("workdir").unwrap(), Value::from(""));
}

#[test]
fn exclusion_applies_to_the_top_level_only() {
    let plugins = plugins();
    let job = new_job(&plugins);
    let child = new_job(&plugins);
    child.set_attribute("name", "inner").unwrap();
    job.set_attribute("name", "outer").unwrap();
    job.set_attribute("subjobs", vec![child]).unwrap();

    let xml = to_string(&job, "name").unwrap();
    assert!(!xml.contains("'outer'"));
    assert!(xml.contains("'inner'"));
    assert_eq!(xml.matches("<attribute name=\"name\">").count(), 1);
}

#[test]
fn markup_characters_are_escaped() {
    let plugins = plugins();
    let job = new_job(&plugins);
    job.set_attribute("name", "a<b & 'c'").unwrap();
    let xml = to_string(&job, "").unwrap();
    assert!(xml.contains("<value>\"a&lt;b &amp; 'c'\"</value>"));
    assert_eq!(
        reload(&plugins, &job).get_attribute("name").unwrap(),
        Value::from("a<b & 'c'")
    );
}

#[test]
fn writer_output_reaches_the_sink() {
    let plugins = plugins();
    let job = new_job(&plugins);
    let mut sink = Vec::new();
    ganga_streamer::to_writer(&job, "", &mut sink).unwrap();
    assert_eq!(String::from_utf8(sink).unwrap(), to_string(&job, "").unwrap());
}

// ── Loading ──────────────────────────────────────────────────────

#[test]
fn full_tree_survives_a_round_trip() {
    let plugins = plugins();
    let job = new_job(&plugins);
    job.set_attribute("name", "analysis").unwrap();
    job.set_attribute("weight", 0.25).unwrap();
    job.set_attribute("outputfiles", vec!["out.root", "log.txt"])
        .unwrap();
    let mut info = BTreeMap::new();
    info.insert("site".to_string(), Value::from("CERN"));
    info.insert("cores".to_string(), Value::Int(8));
    job.set_attribute("info", Value::Dict(info)).unwrap();
    let data = plugins.instantiate("datasets", "FileList").unwrap();
    data.set_attribute("files", vec!["a.dst"]).unwrap();
    job.set_attribute("inputdata", data).unwrap();
    job.set_attribute("subjobs", vec![new_job(&plugins), new_job(&plugins)])
        .unwrap();

    let loaded = reload(&plugins, &job);
    assert_eq!(loaded, job);
    let subjobs = loaded.get_attribute("subjobs").unwrap();
    let subjobs = subjobs.as_list().unwrap();
    assert_eq!(subjobs.len(), 2);
    assert!(subjobs[0].as_object().unwrap().parent().unwrap().ptr_eq(&loaded));
}

#[test]
fn missing_attributes_take_their_defaults() {
    let plugins = plugins();
    let xml = format!("<root>\n{EXECUTABLE_OPEN}</class>\n</root>\n");
    let loaded = from_str(&plugins, &xml).unwrap().object;
    assert_eq!(loaded.get_attribute("exe").unwrap(), Value::from("echo"));
    assert_eq!(loaded.get_attribute("args").unwrap(), Value::List(vec![]));
}

#[test]
fn self_closing_class_is_accepted() {
    let plugins = plugins();
    let xml = "<root><class name=\"Executable\" version=\"1.0\" category=\"applications\"/></root>";
    let loaded = from_str(&plugins, xml).unwrap().object;
    assert_eq!(loaded.class_name(), "Executable");
    assert!(loaded.has_raw_attribute("exe"));
}

#[test]
fn required_attribute_must_be_stored() {
    let plugins = plugins();
    let xml = "<root><class name=\"Task\" version=\"1.0\" category=\"tasks\">\
               <attribute name=\"size\"><value>5</value></attribute></class></root>";
    let err = from_str(&plugins, xml).unwrap_err();
    assert!(matches!(err, StreamError::Incomplete { ref attribute, .. } if attribute == "label"));

    let xml = "<root><class name=\"Task\" version=\"1.0\" category=\"tasks\">\
               <attribute name=\"label\"><value>'x'</value></attribute></class></root>";
    let loaded = from_str(&plugins, xml).unwrap().object;
    assert_eq!(loaded.get_attribute("size").unwrap(), Value::Int(3));
}

#[test]
fn reader_input_is_supported() {
    let plugins = plugins();
    let job = new_job(&plugins);
    let xml = to_string(&job, "").unwrap();
    let loaded = from_reader(&plugins, xml.as_bytes()).unwrap();
    assert_eq!(loaded.object, job);
}

// ── Error containment ────────────────────────────────────────────

#[test]
fn unknown_class_becomes_a_placeholder() {
    let plugins = plugins();
    let job = new_job(&plugins);
    job.set_attribute("name", "survivor").unwrap();
    let xml = to_string(&job, "")
        .unwrap()
        .replace("name=\"Executable\"", "name=\"Ghost\"");

    let loaded = from_str(&plugins, &xml).unwrap();
    assert_eq!(loaded.errors.len(), 1);
    assert!(loaded.errors[0].is_soft());
    assert!(matches!(&loaded.errors[0], StreamError::UnknownClass { name, .. } if name == "Ghost"));

    let object = loaded.object;
    assert!(!object.is_empty_placeholder());
    assert_eq!(object.get_attribute("name").unwrap(), Value::from("survivor"));
    let app = object.get_attribute("application").unwrap();
    assert!(app.as_object().unwrap().is_empty_placeholder());
    let backend = object.get_attribute("backend").unwrap();
    assert_eq!(backend.as_object().unwrap().class_name(), "Local");
}

#[test]
fn incompatible_version_is_contained() {
    let plugins = plugins();
    let job = new_job(&plugins);
    let xml = to_string(&job, "").unwrap();

    let newer_major = xml.replace("version=\"1.2\"", "version=\"2.0\"");
    let loaded = from_str(&plugins, &newer_major).unwrap();
    assert!(loaded.object.is_empty_placeholder());
    assert!(matches!(
        &loaded.errors[..],
        [StreamError::SchemaVersion { stored, .. }] if *stored == Version::new(2, 0)
    ));

    let newer_minor = xml.replace("version=\"1.2\"", "version=\"1.3\"");
    assert!(from_str(&plugins, &newer_minor).unwrap().object.is_empty_placeholder());

    let older_minor = xml.replace("version=\"1.2\"", "version=\"1.1\"");
    let loaded = from_str(&plugins, &older_minor).unwrap();
    assert!(loaded.errors.is_empty());
    assert_eq!(loaded.object.class_name(), "Job");
}

#[test]
fn duplicated_root_is_rejected() {
    let plugins = plugins();
    let err = from_str(&plugins, "<root><root></root></root>").unwrap_err();
    assert!(matches!(err, StreamError::Structure(_)));
}

#[test]
fn missing_root_is_rejected() {
    let plugins = plugins();
    let xml = format!("{EXECUTABLE_OPEN}</class>");
    assert!(matches!(
        from_str(&plugins, &xml).unwrap_err(),
        StreamError::Structure(_)
    ));
}

#[test]
fn multiple_top_level_objects_are_rejected() {
    let plugins = plugins();
    let xml = format!("<root>{EXECUTABLE_OPEN}</class>{EXECUTABLE_OPEN}</class></root>");
    assert!(matches!(
        from_str(&plugins, &xml).unwrap_err(),
        StreamError::Structure(_)
    ));
}

#[test]
fn empty_root_is_rejected() {
    let plugins = plugins();
    assert!(from_str(&plugins, "<root></root>").is_err());
}

#[test]
fn malformed_xml_is_a_hard_error() {
    let plugins = plugins();
    let xml = format!("<root>{EXECUTABLE_OPEN}<attribute name=\"exe\"></class></root>");
    assert!(from_str(&plugins, &xml).is_err());
}

#[test]
fn invalid_literal_is_a_hard_error() {
    let plugins = plugins();
    let xml = format!(
        "<root>{EXECUTABLE_OPEN}<attribute name=\"exe\"><value>os.system('x')</value></attribute></class></root>"
    );
    let err = from_str(&plugins, &xml).unwrap_err();
    assert!(!err.is_soft());
}

// ── Display ──────────────────────────────────────────────────────

#[test]
fn tree_printer_renders_attributes() {
    let plugins = plugins();
    let app = plugins.instantiate("applications", "Executable").unwrap();
    let text = TreePrinter::new(false).render(&app).unwrap();
    assert_eq!(text, "Executable (\n   exe = 'echo' ,\n   args = [] )");
}

#[test]
fn tree_printer_hides_hidden_items_on_request() {
    let plugins = plugins();
    let backend = plugins.instantiate("backends", "Local").unwrap();
    assert!(!TreePrinter::new(false).render(&backend).unwrap().contains("pid"));
    assert!(TreePrinter::new(true).render(&backend).unwrap().contains("pid = None"));
}

// ===== HELPER STRATEGIES =====

fn text_strategy() -> impl Strategy<Value = String> {
    "[ -~\\t\\néü€]{0,24}"
}

fn arg_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        text_strategy().prop_map(Value::from),
        any::<i64>().prop_map(Value::Int),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_round_trip_preserves_values(
        name in text_strategy(),
        weight in -1.0e12f64..1.0e12,
        files in prop::collection::vec(text_strategy(), 0..5),
        args in prop::collection::vec(arg_strategy(), 0..5),
        exe in text_strategy(),
    ) {
        let plugins = plugins();
        let job = new_job(&plugins);
        job.set_attribute("name", name).unwrap();
        job.set_attribute("weight", weight).unwrap();
        job.set_attribute("outputfiles", files).unwrap();
        let app = plugins.instantiate("applications", "Executable").unwrap();
        app.set_attribute("exe", exe).unwrap();
        app.set_attribute("args", args).unwrap();
        job.set_attribute("application", app).unwrap();

        let first = to_string(&job, "").unwrap();
        let loaded = from_str(&plugins, &first).unwrap();
        prop_assert!(loaded.errors.is_empty());
        prop_assert_eq!(&loaded.object, &job);
        prop_assert_eq!(to_string(&loaded.object, "").unwrap(), first);
    }
}

// ── Generated schemas ────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Kind {
    Int,
    Float,
    Text,
    Flag,
    Texts,
}

#[derive(Debug, Clone)]
struct Field {
    kind: Kind,
    default: Value,
}

impl Field {
    fn item(&self) -> Item {
        match self.kind {
            Kind::Texts => Item::simple(self.default.clone())
                .sequence()
                .typelist([ValueType::Str]),
            _ => Item::simple(self.default.clone()),
        }
    }
}

/// Two generated classes: `roots.Root` holding plain fields, an optional
/// `leaves.Leaf` child and a list of them.
#[derive(Debug, Clone)]
struct Tree {
    root_fields: Vec<Field>,
    leaf_fields: Vec<Field>,
    root_values: Vec<Option<Value>>,
    child: Option<Vec<Option<Value>>>,
    kids: Vec<Vec<Option<Value>>>,
}

impl Tree {
    fn plugins(&self) -> Arc<PluginRegistry> {
        let plugins = PluginRegistry::new();
        let mut leaf = Schema::new("leaves", "Leaf", Version::new(1, 0));
        for (i, field) in self.leaf_fields.iter().enumerate() {
            leaf = leaf.with_item(&format!("l{i}"), field.item());
        }
        plugins.register(leaf);
        let mut root = Schema::new("roots", "Root", Version::new(2, 1))
            .with_item("child", Item::optional_component("leaves"))
            .with_item("kids", Item::component_list("leaves"));
        for (i, field) in self.root_fields.iter().enumerate() {
            root = root.with_item(&format!("r{i}"), field.item());
        }
        plugins.register(root);
        plugins
    }

    fn build(&self, plugins: &Arc<PluginRegistry>) -> ObjectRef {
        let root = plugins.instantiate("roots", "Root").unwrap();
        assign(&root, "r", &self.root_values);
        if let Some(values) = &self.child {
            root.set_attribute("child", leaf(plugins, values)).unwrap();
        }
        let kids: Vec<Value> = self
            .kids
            .iter()
            .map(|values| Value::Object(leaf(plugins, values)))
            .collect();
        root.set_attribute("kids", Value::List(kids)).unwrap();
        root
    }
}

fn leaf(plugins: &Arc<PluginRegistry>, values: &[Option<Value>]) -> ObjectRef {
    let obj = plugins.instantiate("leaves", "Leaf").unwrap();
    assign(&obj, "l", values);
    obj
}

fn assign(obj: &ObjectRef, prefix: &str, values: &[Option<Value>]) {
    for (i, value) in values.iter().enumerate() {
        if let Some(value) = value {
            obj.set_attribute(&format!("{prefix}{i}"), value.clone()).unwrap();
        }
    }
}

/// Cuts `<attribute name="..">..</attribute>` of a plain top-level field.
fn drop_attribute(xml: &str, name: &str) -> String {
    let open = format!("<attribute name=\"{name}\">");
    let Some(start) = xml.find(&open) else {
        return xml.to_string();
    };
    let line_start = xml[..start].rfind('\n').map_or(0, |i| i + 1);
    let close = "</attribute>\n";
    let end = start + xml[start..].find(close).unwrap() + close.len();
    format!("{}{}", &xml[..line_start], &xml[end..])
}

fn kind_strategy() -> impl Strategy<Value = Kind> {
    prop_oneof![
        Just(Kind::Int),
        Just(Kind::Float),
        Just(Kind::Text),
        Just(Kind::Flag),
        Just(Kind::Texts),
    ]
}

fn value_strategy(kind: Kind) -> BoxedStrategy<Value> {
    match kind {
        Kind::Int => any::<i64>().prop_map(Value::Int).boxed(),
        Kind::Float => (-1.0e9f64..1.0e9).prop_map(Value::Float).boxed(),
        Kind::Text => text_strategy().prop_map(Value::from).boxed(),
        Kind::Flag => any::<bool>().prop_map(Value::Bool).boxed(),
        Kind::Texts => prop::collection::vec(text_strategy().prop_map(Value::from), 0..4)
            .prop_map(Value::List)
            .boxed(),
    }
}

fn field_strategy() -> impl Strategy<Value = Field> {
    kind_strategy().prop_flat_map(|kind| {
        value_strategy(kind).prop_map(move |default| Field { kind, default })
    })
}

fn values_strategy(fields: &[Field]) -> Vec<BoxedStrategy<Option<Value>>> {
    fields
        .iter()
        .map(|f| prop::option::of(value_strategy(f.kind)).boxed())
        .collect()
}

fn tree_strategy() -> impl Strategy<Value = Tree> {
    (
        prop::collection::vec(field_strategy(), 0..6),
        prop::collection::vec(field_strategy(), 0..4),
    )
        .prop_flat_map(|(root_fields, leaf_fields)| {
            let leaf_values = values_strategy(&leaf_fields);
            (
                values_strategy(&root_fields),
                prop::option::of(leaf_values.clone()),
                prop::collection::vec(leaf_values, 0..3),
                Just(root_fields),
                Just(leaf_fields),
            )
        })
        .prop_map(|(root_values, child, kids, root_fields, leaf_fields)| Tree {
            root_fields,
            leaf_fields,
            root_values,
            child,
            kids,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_generated_trees_round_trip(tree in tree_strategy()) {
        let plugins = tree.plugins();
        let root = tree.build(&plugins);

        let loaded = from_str(&plugins, &to_string(&root, "").unwrap()).unwrap();
        prop_assert!(loaded.errors.is_empty(), "unexpected errors: {:?}", loaded.errors);
        prop_assert_eq!(&loaded.object, &root);
    }

    #[test]
    fn prop_omitted_attributes_take_defaults(
        tree in tree_strategy(),
        omit in prop::collection::vec(any::<bool>(), 6),
    ) {
        let plugins = tree.plugins();
        let root = tree.build(&plugins);
        let mut xml = to_string(&root, "").unwrap();
        let omitted: Vec<usize> = (0..tree.root_fields.len()).filter(|&i| omit[i]).collect();
        for &i in &omitted {
            xml = drop_attribute(&xml, &format!("r{i}"));
        }

        let loaded = from_str(&plugins, &xml).unwrap();
        prop_assert!(loaded.errors.is_empty(), "unexpected errors: {:?}", loaded.errors);
        let object = loaded.object;
        for (name, _) in object.schema().items() {
            prop_assert!(object.has_raw_attribute(name), "{} is missing", name);
        }
        for (i, field) in tree.root_fields.iter().enumerate() {
            let name = format!("r{i}");
            let expected = if omitted.contains(&i) {
                field.default.clone()
            } else {
                root.raw_attribute(&name).unwrap()
            };
            prop_assert_eq!(object.raw_attribute(&name), Some(expected));
        }
        prop_assert_eq!(object.raw_attribute("kids"), root.raw_attribute("kids"));
    }
}
