// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 ringbell developers

//! Unit tests for the submission channel organized by category
