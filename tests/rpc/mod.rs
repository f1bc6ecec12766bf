mod loop_tests;
