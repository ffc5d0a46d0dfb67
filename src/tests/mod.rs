// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

mod analysis;
mod common;
mod transform;
