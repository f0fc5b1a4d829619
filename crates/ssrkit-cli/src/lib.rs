// Copyright 2025 MaDRPC Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # ssrkit CLI
//!
//! Command-line interface for the ssrkit rendering server.
//!
//! ## Key Commands
//!
//! - `ssrkit serve`: Start the HTTP rendering server from a config file
//! - `ssrkit render`: Render one fragment and print its markup
//! - `ssrkit digest`: Print or check the content digest of a source tree
//! - `ssrkit stats`: Print the metrics of a running server

pub mod stats;
