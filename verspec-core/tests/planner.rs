use verspec_core::dsl::{parse_spec_file, ReferenceKind};
use verspec_core::planner::{UnitInstance, ResolveError};
use verspec_core::tree::{BlockId, FileOrigin, SpecTree, TreeFile};
use verspec_core::{plan, Selector, TagExpr};

fn tree(files: &[(&str, &str)]) -> SpecTree {
    SpecTree::new(files.iter().map(|(path, text)| TreeFile {
        path: path.to_string(),
        origin: FileOrigin::Local,
        spec: parse_spec_file(path, text).unwrap(),
    }))
}

fn named(t: &SpecTree, name: &str) -> BlockId {
    t.blocks()
        .find(|(_, _, b)| b.name.as_deref() == Some(name))
        .map(|(id, _, _)| id)
        .unwrap()
}

const FIXTURES: &str = "\
### Connect
# name: connect
POST /connect

### Reset
# name: reset
# forceRef: connect
POST /reset
";

#[test]
fn cached_target_is_one_shared_unit() {
    let t = tree(&[(
        "a.spec",
        "### login\n# name: login\nPOST /auth\n\n\
         ### me\n# name: me\n# ref: login\nGET /me\n\n\
         ### orders\n# name: orders\n# ref: login\nGET /orders\n",
    )]);
    let selected = vec![named(&t, "me"), named(&t, "orders")];
    let p = plan(&t, &selected).unwrap();

    let logins: Vec<_> = p.units.iter().filter(|u| u.label == "a.spec#login").collect();
    assert_eq!(logins.len(), 1);
    assert!(logins[0].cached_target);
    assert!(!logins[0].selected);
    assert_eq!(p.units.len(), 3);

    let order: Vec<&str> = p.order.iter().map(|id| p.unit(*id).label.as_str()).collect();
    assert_eq!(order, vec!["a.spec#login", "a.spec#me", "a.spec#orders"]);
    assert_eq!(p.levels.len(), 2);
}

#[test]
fn forced_ref_creates_one_fresh_unit_per_consumer() {
    let t = tree(&[(
        "a.spec",
        "### reset\n# name: reset\nPOST /reset\n\n\
         ### one\n# name: one\n# forceRef: reset\nGET /1\n\n\
         ### two\n# name: two\n# forceRef: reset\nGET /2\n",
    )]);
    let selected = vec![named(&t, "one"), named(&t, "two")];
    let p = plan(&t, &selected).unwrap();

    let resets: Vec<_> = p.units.iter().filter(|u| u.label == "a.spec#reset").collect();
    assert_eq!(resets.len(), 2);
    assert!(resets.iter().all(|u| u.is_fresh() && !u.cached_target));
    let consumers: Vec<_> = resets
        .iter()
        .map(|u| match u.instance {
            UnitInstance::Fresh { consumer } => p.unit(consumer).label.clone(),
            UnitInstance::Shared => unreachable!(),
        })
        .collect();
    assert_eq!(consumers, vec!["a.spec#one", "a.spec#two"]);

    for unit in p.units.iter().filter(|u| u.selected) {
        let dep = unit.depends_on[0];
        let pos = |id| p.order.iter().position(|x| *x == id).unwrap();
        assert!(pos(dep) < pos(unit.id));
        assert_eq!(unit.references[0].kind, ReferenceKind::Forced);
    }
}

#[test]
fn forced_chain_of_forced_refs_is_accepted() {
    let t = tree(&[(
        "fixtures.spec",
        &format!("{FIXTURES}\n### Seed\n# name: seed\n# forceRef: reset\nPOST /seed\n"),
    )]);
    let p = plan(&t, &[named(&t, "seed")]).unwrap();
    // seed, a fresh reset for seed, a fresh connect for that reset
    assert_eq!(p.units.len(), 3);
    assert_eq!(p.units.iter().filter(|u| u.is_fresh()).count(), 2);
}

#[test]
fn forced_ref_onto_cached_dependency_is_rejected() {
    let stale = FIXTURES.replace("# forceRef: connect", "# ref: connect");
    let t = tree(&[(
        "fixtures.spec",
        &format!("{stale}\n### Seed\n# name: seed\n# forceRef: reset\nPOST /seed\n"),
    )]);
    let err = plan(&t, &[named(&t, "seed")]).unwrap_err();
    assert_eq!(
        err.errors,
        vec![ResolveError::StaleForcedRef {
            consumer: "fixtures.spec#seed".to_string(),
            target: "fixtures.spec#reset".to_string(),
            dependency: "fixtures.spec#connect".to_string(),
        }]
    );
}

#[test]
fn cycle_is_reported_with_its_path() {
    let t = tree(&[(
        "c.spec",
        "### a\n# name: a\n# ref: b\nGET /a\n\n### b\n# name: b\n# forceRef: a\nGET /b\n",
    )]);
    let err = plan(&t, &[named(&t, "a")]).unwrap_err();
    match &err.errors[..] {
        [ResolveError::DependencyCycle { path }] => {
            assert_eq!(path, &vec!["c.spec#a", "c.spec#b", "c.spec#a"]);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn self_reference_is_a_cycle() {
    let t = tree(&[("s.spec", "### a\n# name: a\n# ref: a\nGET /a\n")]);
    let err = plan(&t, &[named(&t, "a")]).unwrap_err();
    assert!(matches!(&err.errors[..], [ResolveError::DependencyCycle { .. }]));
}

#[test]
fn unknown_reference_names_block_and_file() {
    let t = tree(&[("u.spec", "### me\n# name: me\n# ref: nobody\nGET /me\n")]);
    let err = plan(&t, &[named(&t, "me")]).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("u.spec:3"), "{message}");
    assert!(message.contains("`nobody`"), "{message}");
}

#[test]
fn path_selection_pulls_in_dependencies_outside_the_prefix() {
    let t = tree(&[
        ("common/auth.spec", "### login\n# name: login\nPOST /auth\n"),
        ("users/me.spec", "import ../common/auth.spec\n### me\n# name: me\n# ref: login\nGET /me\n"),
        ("users/other.spec", "### other\nGET /other\n"),
    ]);
    let selected = Selector::all().with_path("users/me.spec").select(&t);
    assert_eq!(selected.len(), 1);
    let p = plan(&t, &selected).unwrap();
    let labels: Vec<&str> = p.order.iter().map(|id| p.unit(*id).label.as_str()).collect();
    assert_eq!(labels, vec!["common/auth.spec#login", "users/me.spec#me"]);
}

#[test]
fn tag_selection_scans_the_whole_tree() {
    let t = tree(&[
        ("a.spec", "### a\n# tags: smoke\nGET /a\n"),
        ("b/c.spec", "### c\n# tags: smoke, slow\nGET /c\n"),
        ("d.spec", "### d\nGET /d\n"),
    ]);
    let sel = Selector::all().with_tags(TagExpr::parse("smoke && !slow").unwrap());
    let picked = sel.select(&t);
    assert_eq!(picked.len(), 1);
    assert_eq!(t.block_label(picked[0]), "a.spec#a");
}

#[test]
fn order_is_deterministic() {
    let text = "### z\n# name: z\nGET /z\n\n### y\n# name: y\n# ref: z\nGET /y\n\n### x\n# name: x\nGET /x\n";
    let t = tree(&[("o.spec", text)]);
    let all = Selector::all().select(&t);
    let first = plan(&t, &all).unwrap();
    let second = plan(&t, &all).unwrap();
    assert_eq!(first.order, second.order);
    let labels: Vec<&str> = first.order.iter().map(|id| first.unit(*id).label.as_str()).collect();
    assert_eq!(labels, vec!["o.spec#z", "o.spec#y", "o.spec#x"]);

    let dot = first.to_dot("v1");
    assert!(dot.starts_with("digraph verspec {"));
    assert!(dot.contains("\"u0\" -> \"u1\""));
}
