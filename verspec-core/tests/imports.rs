use verspec_core::dsl::parse_spec_file;
use verspec_core::imports::{ImportError, Lookup, ScopeResolver};
use verspec_core::tree::{BlockId, FileOrigin, SpecTree, TreeFile};

fn tree(files: &[(&str, &str)]) -> SpecTree {
    SpecTree::new(files.iter().map(|(path, text)| TreeFile {
        path: path.to_string(),
        origin: FileOrigin::Local,
        spec: parse_spec_file(path, text).unwrap(),
    }))
}

#[test]
fn imported_names_and_variables_are_visible() {
    let t = tree(&[
        ("common/auth.spec", "@user = alice\n### Login\n# name: login\nPOST /auth\n"),
        ("users.spec", "import ./common/auth.spec\n### Me\n# name: me\n# ref: login\nGET /me\n"),
    ]);
    let users = t.file_id("users.spec").unwrap();
    let auth = t.file_id("common/auth.spec").unwrap();
    let mut resolver = ScopeResolver::new(&t);
    let scope = resolver.scope(users).unwrap();

    assert_eq!(
        scope.lookup("login"),
        Lookup::Found(BlockId {
            file: auth,
            index: 0
        })
    );
    assert_eq!(scope.variables.get("user").map(String::as_str), Some("alice"));
    assert_eq!(scope.script_chain, vec![auth, users]);
}

#[test]
fn own_definitions_take_precedence() {
    let t = tree(&[
        ("a.spec", "@env = shared\n### a\n# name: login\nGET /a\n"),
        ("b.spec", "import a.spec\n@env = local\n### b\n# name: login\nGET /b\n"),
    ]);
    let b = t.file_id("b.spec").unwrap();
    let scope = ScopeResolver::new(&t).scope(b).unwrap();
    assert_eq!(scope.lookup("login"), Lookup::Found(BlockId { file: b, index: 0 }));
    assert_eq!(scope.variables["env"], "local");
}

#[test]
fn transitive_imports_are_followed() {
    let t = tree(&[
        ("base.spec", "### base\n# name: connect\nGET /connect\n"),
        ("mid.spec", "import base.spec\n"),
        ("top.spec", "import mid.spec\n### t\nGET /t\n"),
    ]);
    let top = t.file_id("top.spec").unwrap();
    let scope = ScopeResolver::new(&t).scope(top).unwrap();
    assert!(matches!(scope.lookup("connect"), Lookup::Found(_)));
    let chain: Vec<&str> = scope
        .script_chain
        .iter()
        .map(|f| t.file(*f).path.as_str())
        .collect();
    assert_eq!(chain, vec!["base.spec", "mid.spec", "top.spec"]);
}

#[test]
fn same_name_from_two_imports_is_ambiguous() {
    let t = tree(&[
        ("x.spec", "### x\n# name: setup\nGET /x\n"),
        ("y.spec", "### y\n# name: setup\nGET /y\n"),
        ("z.spec", "import x.spec\nimport y.spec\n### z\nGET /z\n"),
    ]);
    let z = t.file_id("z.spec").unwrap();
    let scope = ScopeResolver::new(&t).scope(z).unwrap();
    assert!(matches!(scope.lookup("setup"), Lookup::Ambiguous(ids) if ids.len() == 2));
}

#[test]
fn diamond_imports_are_not_ambiguous() {
    let t = tree(&[
        ("base.spec", "### base\n# name: setup\nGET /\n"),
        ("l.spec", "import base.spec\n"),
        ("r.spec", "import base.spec\n"),
        ("top.spec", "import l.spec\nimport r.spec\n"),
    ]);
    let top = t.file_id("top.spec").unwrap();
    let scope = ScopeResolver::new(&t).scope(top).unwrap();
    assert!(matches!(scope.lookup("setup"), Lookup::Found(_)));
    assert_eq!(scope.script_chain.len(), 4);
}

#[test]
fn import_cycle_is_reported_with_chain() {
    let t = tree(&[
        ("a.spec", "import b.spec\n"),
        ("b.spec", "import a.spec\n"),
    ]);
    let a = t.file_id("a.spec").unwrap();
    let err = ScopeResolver::new(&t).scope(a).unwrap_err();
    assert_eq!(
        err,
        ImportError::Cycle {
            chain: vec!["a.spec".into(), "b.spec".into(), "a.spec".into()]
        }
    );
}

#[test]
fn missing_import_is_recorded() {
    let t = tree(&[("a.spec", "import gone.spec\n### a\nGET /\n")]);
    let a = t.file_id("a.spec").unwrap();
    let scope = ScopeResolver::new(&t).scope(a).unwrap();
    assert_eq!(scope.missing_imports, vec!["gone.spec".to_string()]);
}
