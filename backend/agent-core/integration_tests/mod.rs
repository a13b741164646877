mod exchange_tests;
