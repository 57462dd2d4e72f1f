//! Integration tests for layout, view and partial composition

use mold::{Config, Engine, Error, Escape, Marker, Role};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn build(files: &[(&str, &str)]) -> Result<Engine, Error> {
    Engine::from_files(files.iter().copied(), Config::new().with_layout("layout.html"))
}

fn render(engine: &Engine, view: &str, data: Value) -> String {
    engine.render_to_string(view, &data).expect("Should render")
}

const LAYOUT: &str = r#"<html><body>{{render}}<br>{{partial "partial2.html" .Age}}</body></html>"#;
const VIEW: &str = r#"Hello, {{.Name}}!<br>{{partial "partial.html" .Location}}"#;

fn john_doe() -> Value {
    json!({"Name": "John Doe", "Location": "Mars", "Age": 40})
}

#[test]
fn test_layout_view_and_partials() {
    let engine = build(&[
        ("layout.html", LAYOUT),
        ("view.html", VIEW),
        ("partial.html", "Location: {{.}}"),
        ("partial2.html", "Age: {{.}}"),
    ])
    .expect("Should build");

    assert_eq!(
        render(&engine, "view.html", john_doe()),
        "<html><body>Hello, John Doe!<br>Location: Mars<br>Age: 40</body></html>"
    );
}

#[test]
fn test_unknown_view_is_not_found() {
    let engine = build(&[("layout.html", "{{render}}"), ("view.html", "v")]).expect("Should build");
    let mut out = Vec::new();
    let err = engine
        .render(&mut out, "nope.html", &john_doe())
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(out.is_empty());
}

#[test]
fn test_render_without_target_is_body() {
    let engine = build(&[
        ("layout.html", r#"[{{render}}][{{render "body"}}]"#),
        ("view.html", "v"),
    ])
    .expect("Should build");
    assert_eq!(render(&engine, "view.html", json!(null)), "[v][v]");
}

#[test]
fn test_head_section() {
    let engine = build(&[
        (
            "layout.html",
            r#"<html><head>{{render "head"}}</head><body>{{render}}</body></html>"#,
        ),
        (
            "home.html",
            r#"{{define "head"}}<title>{{.Title}}</title>{{end}}<h1>{{.Title}}</h1>"#,
        ),
        ("plain.html", "<p>plain</p>"),
    ])
    .expect("Should build");

    assert_eq!(
        render(&engine, "home.html", json!({"Title": "Home"})),
        "<html><head><title>Home</title></head><body><h1>Home</h1></body></html>"
    );
    assert_eq!(
        render(&engine, "plain.html", json!({})),
        "<html><head></head><body><p>plain</p></body></html>"
    );
}

#[test]
fn test_optional_layout_section() {
    let engine = build(&[
        (
            "layout.html",
            r#"<aside>{{render "sidebar"}}</aside><main>{{render}}</main>"#,
        ),
        ("with.html", r#"{{define "sidebar"}}links{{end}}content"#),
        ("without.html", "content"),
    ])
    .expect("Should build");

    assert_eq!(
        render(&engine, "with.html", json!(null)),
        "<aside>links</aside><main>content</main>"
    );
    assert_eq!(
        render(&engine, "without.html", json!(null)),
        "<aside></aside><main>content</main>"
    );
}

#[test]
fn test_layout_section_default_is_overridable() {
    let engine = build(&[
        (
            "layout.html",
            r#"{{define "footer"}}(c) site{{end}}{{render}}|{{render "footer"}}"#,
        ),
        ("a.html", "a"),
        ("b.html", r#"{{define "footer"}}custom{{end}}b"#),
    ])
    .expect("Should build");

    assert_eq!(render(&engine, "a.html", json!(null)), "a|(c) site");
    assert_eq!(render(&engine, "b.html", json!(null)), "b|custom");
}

#[test]
fn test_partials_in_loops_get_item_context() {
    let engine = build(&[
        ("layout.html", "{{render}}"),
        (
            "list.html",
            r#"<ul>{{range .Users}}{{partial "item.html" .Name}}{{end}}</ul>"#,
        ),
        ("item.html", "<li>{{.}}</li>"),
    ])
    .expect("Should build");

    assert_eq!(
        render(&engine, "list.html", json!({"Users": [{"Name": "Ann"}, {"Name": "Bo"}]})),
        "<ul><li>Ann</li><li>Bo</li></ul>"
    );
}

#[test]
fn test_partial_defaults_to_current_dot() {
    let engine = build(&[
        ("layout.html", "{{render}}"),
        ("view.html", r#"{{with .User}}{{partial "card.html"}}{{end}}"#),
        ("card.html", "{{.Name}}/{{.Role}}"),
    ])
    .expect("Should build");

    assert_eq!(
        render(&engine, "view.html", json!({"User": {"Name": "Ann", "Role": "admin"}})),
        "Ann/admin"
    );
}

#[test]
fn test_view_invoking_render_is_illegal() {
    let err = build(&[("layout.html", "{{render}}"), ("view.html", "x\n  {{render}}")]).unwrap_err();
    match &err {
        Error::IllegalMarker { marker, role, location } => {
            assert_eq!(*marker, Marker::Render);
            assert_eq!(*role, Role::View);
            assert_eq!((location.line, location.column), (2, 3));
        }
        other => panic!("Expected illegal marker, got {:?}", other),
    }
    insta::assert_snapshot!(err.to_string(), @"view.html:2:3: view: render not supported");
}

#[test]
fn test_partial_invoking_render_is_illegal() {
    let err = build(&[
        ("layout.html", "{{render}}"),
        ("view.html", r#"{{partial "widget.html"}}"#),
        ("widget.html", r#"{{if .}}{{render "head"}}{{end}}"#),
    ])
    .unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"widget.html:1:9: partial: render not supported");
}

#[test]
fn test_mutual_partial_reference_is_illegal() {
    let err = build(&[
        ("layout.html", "{{render}}"),
        ("view.html", r#"{{partial "partial.html"}}"#),
        ("partial.html", r#"{{partial "view.html"}}"#),
    ])
    .unwrap_err();
    assert!(matches!(
        err,
        Error::IllegalMarker {
            marker: Marker::Partial,
            role: Role::Partial,
            ..
        }
    ));
}

#[test]
fn test_self_reference_is_cyclic() {
    let err = build(&[
        ("layout.html", "{{render}}"),
        (
            "view.html",
            "{{range .}}\n  {{if .}}{{partial \"view.html\"}}{{end}}\n{{end}}",
        ),
    ])
    .unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"view.html:2:11: cyclic reference to 'view.html'");
}

#[test]
fn test_layout_self_reference_is_cyclic() {
    let err = build(&[("layout.html", r#"{{render}}{{partial "layout.html"}}"#)]).unwrap_err();
    assert!(matches!(err, Error::CyclicReference { .. }));
}

#[test]
fn test_partial_without_target() {
    let err = build(&[("layout.html", "{{render}}"), ("view.html", "<p>{{partial}}</p>")]).unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"view.html:1:4: path to partial file is not specified");
}

#[test]
fn test_missing_partial_fails_construction() {
    let err = build(&[("layout.html", r#"{{render}}{{partial "footer.html"}}"#), ("view.html", "v")])
        .unwrap_err();
    assert!(err.is_not_found());

    let err = build(&[("layout.html", "{{render}}"), ("view.html", r#"{{partial "gone.html"}}"#)])
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "template 'gone.html' not found");
}

#[test]
fn test_missing_layout_fails_construction() {
    let err = Engine::from_files([("view.html", "v")], Config::new().with_layout("base_layout.html"))
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_layout_files_are_not_views() {
    let engine = build(&[
        ("layout.html", "{{render}}"),
        ("admin/admin_layout.html", "{{render}}"),
        ("view.html", "v"),
    ])
    .expect("Should build");
    assert_eq!(engine.views().collect::<Vec<_>>(), vec!["view.html"]);
}

#[test]
fn test_parse_error_reports_file() {
    let err = build(&[("layout.html", "{{render}}"), ("view.html", "ok\n{{if .A}}x")]).unwrap_err();
    match err {
        Error::Parse { location, .. } => {
            assert_eq!(location.file, "view.html");
            assert_eq!(location.line, 2);
        }
        other => panic!("Expected parse error, got {:?}", other),
    }
}

#[test]
fn test_unknown_function_is_parse_error() {
    let err = build(&[("layout.html", "{{render}}"), ("view.html", "{{shout .Name}}")]).unwrap_err();
    insta::assert_snapshot!(err.to_string(), @r#"view.html:1:3: function "shout" not defined"#);
}

#[test]
fn test_caller_functions() {
    let config = Config::new()
        .with_layout("layout.html")
        .with_func("upper", |args| {
            Ok(Value::String(
                args.first()
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_uppercase(),
            ))
        })
        .with_func("partial", |_| Ok(json!("hijacked")));
    let engine = Engine::from_files(
        [
            ("layout.html", "{{render}}"),
            ("view.html", r#"{{upper .Name}} {{partial "p.html" .}}"#),
            ("p.html", "{{.Location | upper}}"),
        ],
        config,
    )
    .expect("Should build");

    assert_eq!(render(&engine, "view.html", john_doe()), "JOHN DOE MARS");
}

#[test]
fn test_panicking_caller_function_is_execution_error() {
    let config = Config::new()
        .with_layout("layout.html")
        .with_func("boom", |_| panic!("kaboom"));
    let engine = Engine::from_files(
        [
            ("layout.html", "{{render}}"),
            ("fragile.html", "before{{boom}}"),
            ("sturdy.html", "fine"),
        ],
        config,
    )
    .expect("Should build");

    let mut out = Vec::new();
    let err = engine
        .render(&mut out, "fragile.html", &json!(null))
        .unwrap_err();
    assert!(matches!(err, Error::Execution { ref view, .. } if view == "fragile.html"));
    insta::assert_snapshot!(
        err.to_string(),
        @"error rendering 'fragile.html': template: body: error calling boom: panic: kaboom"
    );
    assert_eq!(String::from_utf8(out).expect("utf-8"), "before");

    assert_eq!(render(&engine, "sturdy.html", json!(null)), "fine");
}

#[test]
fn test_escaping_modes() {
    let files = [("layout.html", "{{render}}"), ("view.html", "{{.}}")];

    let engine = Engine::from_files(files, Config::new().with_layout("layout.html")).expect("Should build");
    assert_eq!(render(&engine, "view.html", json!("<b>")), "&lt;b&gt;");

    let engine = Engine::from_files(
        files,
        Config::new()
            .with_layout("layout.html")
            .with_escape(Escape::Plain),
    )
    .expect("Should build");
    assert_eq!(render(&engine, "view.html", json!("<b>")), "<b>");
}

#[test]
fn test_execution_error_keeps_partial_output() {
    let engine = build(&[("layout.html", "<p>{{render}}</p>"), ("view.html", "ok {{len .}}")])
        .expect("Should build");
    let mut out = Vec::new();
    let err = engine.render(&mut out, "view.html", &json!(5)).unwrap_err();
    assert!(matches!(err, Error::Execution { .. }));
    assert_eq!(String::from_utf8(out).expect("utf-8"), "<p>ok ");
}

#[test]
fn test_composition_is_idempotent() {
    let files = [
        ("layout.html", LAYOUT),
        ("view.html", VIEW),
        ("partial.html", "Location: {{.}}"),
        ("partial2.html", "Age: {{.}}"),
    ];
    let first = build(&files).expect("Should build");
    let second = build(&files).expect("Should build");
    for view in first.views() {
        assert_eq!(
            render(&first, view, john_doe()),
            render(&second, view, john_doe())
        );
    }
}

#[test]
fn test_concurrent_renders() {
    let engine = build(&[
        ("layout.html", LAYOUT),
        ("view.html", VIEW),
        ("partial.html", "Location: {{.}}"),
        ("partial2.html", "Age: {{.}}"),
    ])
    .expect("Should build");

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = &engine;
                s.spawn(move || {
                    render(engine, "view.html", json!({"Name": i, "Location": "Mars", "Age": i}))
                })
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            let out = handle.join().expect("Should join");
            assert_eq!(
                out,
                format!("<html><body>Hello, {i}!<br>Location: Mars<br>Age: {i}</body></html>")
            );
        }
    });
}

#[test]
fn test_deep_nesting_is_parse_error() {
    let nested = |n: usize| format!("{}x{}", "{{if .}}".repeat(n), "{{end}}".repeat(n));

    let engine = build(&[("layout.html", "{{render}}"), ("view.html", nested(100).as_str())]).expect("Should build");
    assert_eq!(render(&engine, "view.html", json!(true)), "x");

    let err = build(&[("layout.html", "{{render}}"), ("view.html", nested(5000).as_str())]).unwrap_err();
    match &err {
        Error::Parse { location, .. } => assert_eq!((location.line, location.column), (1, 2051)),
        other => panic!("Expected parse error, got {:?}", other),
    }
    assert!(err.to_string().contains("nesting too deep"));
}
