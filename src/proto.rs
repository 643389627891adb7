// Copyright 2023 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Wire types and the RPC service of the control plane, generated from
//! `proto/ldnsd.proto`.
//!
//! The service, `DNSControl`, has three methods: `SetA`, `DeleteA`, and
//! `ListA`. A wire [`Record`] carries a host and the textual form of an
//! address, neither validated; validation is the store's job.

#![allow(clippy::all)]

tonic::include_proto!("ldnsd");
