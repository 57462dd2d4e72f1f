//! Mold - layouts, views and partials over a Go-style template language
//!
//! A directory of templates is organised into one shared layout, many
//! views, and reusable partials. The layout marks where a view's content
//! goes with `{{render}}` and pulls in partials with `{{partial "name"}}`;
//! views may use partials and define named sections the layout renders.
//! Every view is composed once, up front, into a self-contained template.
//!
//! # Example
//!
//! ```rust
//! use mold::{Config, Engine};
//! use serde_json::json;
//!
//! let engine = Engine::from_files(
//!     [
//!         ("layout.html", r#"<html><body>{{render}}<br>{{partial "partial2.html" .Age}}</body></html>"#),
//!         ("view.html", r#"Hello, {{.Name}}!<br>{{partial "partial.html" .Location}}"#),
//!         ("partial.html", "Location: {{.}}"),
//!         ("partial2.html", "Age: {{.}}"),
//!     ],
//!     Config::new().with_layout("layout.html"),
//! )
//! .unwrap();
//!
//! let html = engine
//!     .render_to_string("view.html", &json!({"Name": "John Doe", "Location": "Mars", "Age": 40}))
//!     .unwrap();
//! assert_eq!(html, "<html><body>Hello, John Doe!<br>Location: Mars<br>Age: 40</body></html>");
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod parser;
pub mod source;
pub mod template;

pub use config::{Config, ConfigError, Escape, MissingKey};
pub use engine::{must, Engine};
pub use error::{Error, Location, ParseError};
pub use exec::{ExecError, Func, Funcs};
pub use source::HiddenTemplates;
pub use template::{Marker, Role};
