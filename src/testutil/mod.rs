// Copyright 2024 Cornell University
// released under BSD 3-Clause License
//
// Private test tooling: a binary-trace fixture builder used only by this
// crate's own `#[cfg(test)]` modules. Never built into the public surface.

pub mod fixture;
