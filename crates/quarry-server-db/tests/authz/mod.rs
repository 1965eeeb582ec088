// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod closure;
mod datasets;
mod invitations;
mod orgs;
mod pages;
mod policies;
mod support;
mod teams;
