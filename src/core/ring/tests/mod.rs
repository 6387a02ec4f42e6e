// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 ringbell developers

//! Unit tests for the descriptor ring organized by category

mod basic;
mod occupancy;
