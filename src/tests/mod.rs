//! End-to-end tests of the HTTP API against a mocked LangSmith server.
