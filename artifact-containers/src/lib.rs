// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Signable container artifacts.

This crate provides the container layer for signing orchestration:
recognizing container files (generic zip archives, application
packages, application package bundles, and NuGet-convention plugin
packages) by extension, extracting them into private temporary
workspaces, enumerating and glob-filtering their contents, and
re-packing them atomically after inner signing has mutated the
workspace.

The [Container] lifecycle is `Closed` → `Open` (via [Container::open])
→ `Disposed` (via [Container::dispose], idempotent, also performed on
drop). While open, contained file paths never escape the container's
working directory.
*/

pub mod container;
pub mod error;
pub mod kind;
pub mod path_matching;

pub use {
    container::{Container, ContainerProvider, ContainerState},
    error::{ContainerError, Result},
    kind::{invariant_extension, ContainerKind},
    path_matching::{split_patterns, FileMatcher},
};
