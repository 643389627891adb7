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

//! Generates the control-plane RPC code from `proto/ldnsd.proto`.

use std::env;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the vendored protoc unless the environment already names one.
    if env::var_os("PROTOC").is_none() {
        env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }
    tonic_build::configure().compile_protos(&["proto/ldnsd.proto"], &["proto"])?;
    println!("cargo:rerun-if-changed=proto/ldnsd.proto");
    Ok(())
}
